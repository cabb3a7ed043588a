//! Scheduled Lambda popping the shared meter period from Redis and submitting the rates
//!
//! Needs `REDIS_HOST`, `AWS_METRIC_NAMESPACE` and `AWS_LOGGING_REGION` in the function
//! environment.

use lambda_runtime::Error;

#[tokio::main]
async fn main() -> Result<(), Error> {
    metrics_cloudwatch_meters::lambda::run().await
}
