//! [HashStore] over a blocking Redis connection
//!
//! *this module requires the `redis` feature flag*

use super::HashStore;
use crate::Error;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

fn store_error(e: redis::RedisError) -> Error {
    Error::Store(e.to_string())
}

/// Commands are serialized over a single connection
pub struct RedisHashStore<C = redis::Connection> {
    connection: Mutex<C>,
}

impl RedisHashStore {
    /// Connect to `url`, e.g. `redis://127.0.0.1:6379/0`
    pub fn open(url: &str, timeout: Duration) -> Result<Self, Error> {
        let client = redis::Client::open(url).map_err(store_error)?;
        let connection = client.get_connection_with_timeout(timeout).map_err(store_error)?;
        connection.set_read_timeout(Some(timeout)).map_err(store_error)?;
        connection.set_write_timeout(Some(timeout)).map_err(store_error)?;
        Ok(Self::new(connection))
    }
}

impl<C: redis::ConnectionLike + Send> RedisHashStore<C> {
    pub fn new(connection: C) -> Self {
        Self {
            connection: Mutex::new(connection),
        }
    }

    fn query<T: redis::FromRedisValue>(&self, cmd: &redis::Cmd) -> Result<T, Error> {
        let mut connection = self.connection.lock().unwrap_or_else(PoisonError::into_inner);
        cmd.query(&mut *connection).map_err(store_error)
    }
}

impl From<redis::Connection> for RedisHashStore {
    fn from(connection: redis::Connection) -> Self {
        Self::new(connection)
    }
}

impl<C: redis::ConnectionLike + Send> HashStore for RedisHashStore<C> {
    fn get(&self, key: &str) -> Result<Option<String>, Error> {
        self.query(redis::cmd("GET").arg(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), Error> {
        self.query(redis::cmd("SET").arg(key).arg(value))
    }

    fn set_if_absent(&self, key: &str, value: &str) -> Result<bool, Error> {
        // OK when set, nil when the key already exists
        let reply: Option<String> = self.query(redis::cmd("SET").arg(key).arg(value).arg("NX"))?;
        Ok(reply.is_some())
    }

    fn hincr_by(&self, key: &str, field: &str, delta: i64) -> Result<i64, Error> {
        self.query(redis::cmd("HINCRBY").arg(key).arg(field).arg(delta))
    }

    fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, Error> {
        self.query(redis::cmd("HGETALL").arg(key))
    }

    fn del(&self, key: &str) -> Result<(), Error> {
        let _removed: i64 = self.query(redis::cmd("DEL").arg(key))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::identity::MetricIdentity;
    use crate::store::{CounterStore, SharedStore, COUNTS_KEY, PERIOD_START_KEY};
    use redis::{RedisResult, Value};
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::time::UNIX_EPOCH;

    /// Connection answering with canned replies and remembering the commands it was sent
    #[derive(Clone, Default)]
    struct Scripted {
        replies: Arc<Mutex<VecDeque<Value>>>,
        sent: Arc<Mutex<Vec<Vec<String>>>>,
    }

    impl Scripted {
        fn replying(replies: impl IntoIterator<Item = Value>) -> Self {
            let scripted = Self::default();
            scripted.replies.lock().unwrap().extend(replies);
            scripted
        }

        fn sent(&self) -> Vec<Vec<String>> {
            self.sent.lock().unwrap().clone()
        }
    }

    /// Arguments of a RESP encoded command
    fn decode(packed: &[u8]) -> Vec<String> {
        let text = String::from_utf8_lossy(packed);
        text.split("\r\n")
            .skip(1)
            .collect::<Vec<_>>()
            .chunks(2)
            .filter_map(|chunk| chunk.get(1).map(|arg| arg.to_string()))
            .collect()
    }

    impl redis::ConnectionLike for Scripted {
        fn req_packed_command(&mut self, cmd: &[u8]) -> RedisResult<Value> {
            self.sent.lock().unwrap().push(decode(cmd));
            Ok(self.replies.lock().unwrap().pop_front().unwrap_or(Value::Nil))
        }

        fn req_packed_commands(&mut self, _cmd: &[u8], _offset: usize, _count: usize) -> RedisResult<Vec<Value>> {
            unimplemented!("pipelines are not used")
        }

        fn get_db(&self) -> i64 {
            0
        }

        fn check_connection(&mut self) -> bool {
            true
        }

        fn is_open(&self) -> bool {
            true
        }
    }

    fn bulk(s: &str) -> Value {
        Value::BulkString(s.as_bytes().to_vec())
    }

    #[test]
    fn set_if_absent_maps_the_reply() {
        let connection = Scripted::replying([Value::Okay, Value::Nil]);
        let store = RedisHashStore::new(connection.clone());

        assert!(store.set_if_absent("k", "1.5").unwrap());
        assert!(!store.set_if_absent("k", "2.5").unwrap());
        assert_eq!(connection.sent()[0], ["SET", "k", "1.5", "NX"]);
    }

    #[test]
    fn hgetall_decodes_field_value_pairs() {
        let connection = Scripted::replying([Value::Array(vec![
            bulk(r#"["bps",[]]"#),
            bulk("3"),
            bulk(r#"["fizz",[]]"#),
            bulk("4"),
        ])]);
        let store = RedisHashStore::new(connection.clone());

        assert_eq!(
            store.hgetall(COUNTS_KEY).unwrap(),
            HashMap::from([
                (r#"["bps",[]]"#.to_owned(), "3".to_owned()),
                (r#"["fizz",[]]"#.to_owned(), "4".to_owned()),
            ])
        );
        assert_eq!(connection.sent(), [["HGETALL", COUNTS_KEY]]);
    }

    #[test]
    fn unexpected_replies_are_store_errors() {
        let connection = Scripted::replying([Value::SimpleString("not a number".into())]);
        let store = RedisHashStore::new(connection);

        assert!(matches!(store.hincr_by(COUNTS_KEY, "f", 1), Err(Error::Store(_))));
    }

    #[test]
    fn shared_store_command_sequence() {
        let clock = ManualClock::at_time(UNIX_EPOCH);
        let connection = Scripted::replying([
            // SET NX at construction
            Value::Okay,
            // HINCRBY
            Value::Int(1),
            // GET, HGETALL, SET, DEL during the pop
            bulk("0"),
            Value::Array(vec![bulk(r#"["bps",[["is_prime","yes"]]]"#), bulk("8")]),
            Value::Okay,
            Value::Int(1),
        ]);
        let store = SharedStore::new(RedisHashStore::new(connection.clone()), Arc::new(clock.clone()));

        store.increment(&MetricIdentity::new("bps", [("is_prime", "yes")]).unwrap());
        clock.advance(std::time::Duration::from_secs(4));
        let rates = store.pop_period().unwrap();

        assert_eq!(rates.into_values().collect::<Vec<_>>(), [2.0]);
        assert_eq!(
            connection.sent(),
            [
                vec!["SET", PERIOD_START_KEY, "0", "NX"],
                vec!["HINCRBY", COUNTS_KEY, r#"["bps",[["is_prime","yes"]]]"#, "1"],
                vec!["GET", PERIOD_START_KEY],
                vec!["HGETALL", COUNTS_KEY],
                vec!["SET", PERIOD_START_KEY, "4"],
                vec!["DEL", COUNTS_KEY],
            ]
        );
    }
}
