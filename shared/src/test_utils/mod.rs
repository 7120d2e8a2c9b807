pub mod dynamo_test_utils;
pub mod failing_log;
pub mod fixtures;
pub mod http_test_utils;
pub mod mock_gateway;
pub mod test_logging;
