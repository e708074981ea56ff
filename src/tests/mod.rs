mod fixtures;

mod test_cached_token_source;
mod test_common_validation;
mod test_retry;
