use std::time::Duration;

use crate::{CacheTtl, FlushIntervalSeconds, TallymanError, TokenNamespace, WorkerCount};

#[test]
fn flush_interval_seconds_try_from_validates_min_1() {
    let f = FlushIntervalSeconds::try_from(1u64).unwrap();
    assert_eq!(*f, 1u64);
    assert_eq!(f.as_duration(), Duration::from_secs(1));

    assert!(matches!(
        FlushIntervalSeconds::try_from(0u64).unwrap_err(),
        TallymanError::InvalidFlushInterval(msg) if msg == "Flush interval must be at least 1 second"
    ));

    assert_eq!(*FlushIntervalSeconds::default(), 60);
}

#[test]
fn worker_count_try_from_validates_nonzero() {
    let w = WorkerCount::try_from(4usize).unwrap();
    assert_eq!(*w, 4);

    assert!(matches!(
        WorkerCount::try_from(0usize).unwrap_err(),
        TallymanError::InvalidWorkerCount(msg) if msg == "Worker count must be greater than 0"
    ));

    assert_eq!(*WorkerCount::default(), 3);
}

#[test]
fn cache_ttl_default_and_try_from_validate_positive() {
    assert_eq!(*CacheTtl::default(), Duration::from_secs(120));

    let t = CacheTtl::from_minutes(15).unwrap();
    assert_eq!(*t, Duration::from_secs(15 * 60));

    assert!(matches!(
        CacheTtl::try_from(Duration::ZERO).unwrap_err(),
        TallymanError::InvalidCacheTtl(msg) if msg == "Cache ttl must be greater than 0"
    ));
    assert!(CacheTtl::from_minutes(0).is_err());
}

#[test]
fn token_namespace_is_decided_by_prefix() {
    assert_eq!(TokenNamespace::of("dev-abc"), TokenNamespace::Developer);
    assert_eq!(TokenNamespace::of("abc-dev"), TokenNamespace::Normal);
    assert_eq!(TokenNamespace::of("DEV-abc"), TokenNamespace::Normal);
    assert_eq!(TokenNamespace::Developer.as_str(), "developer");
}

#[cfg(feature = "redis-tokio")]
#[test]
fn redis_key_try_from_validates_shape() {
    use crate::store::RedisKey;

    let k = RedisKey::try_from("myapp".to_string()).unwrap();
    assert_eq!(&**k, "myapp");
    assert_eq!(&**RedisKey::default_prefix(), "tallyman");

    assert!(matches!(
        RedisKey::try_from(String::new()).unwrap_err(),
        TallymanError::InvalidRedisKey(msg) if msg == "Redis key must not be empty"
    ));
    assert!(matches!(
        RedisKey::try_from("a:b".to_string()).unwrap_err(),
        TallymanError::InvalidRedisKey(msg) if msg == "Redis key must not contain colons"
    ));
    assert!(RedisKey::try_from("x".repeat(256)).is_err());
}

#[cfg(feature = "redis-tokio")]
#[test]
fn redis_key_parts_cannot_collide_through_colons() {
    use chrono::NaiveDate;

    use crate::store::{RedisKey, RedisKeyGenerator, UsageKey};

    let keys = RedisKeyGenerator::new(RedisKey::try_from("app".to_string()).unwrap());

    assert_ne!(keys.document_key("a:b", "c"), keys.document_key("a", "b:c"));
    assert_eq!(keys.document_key("token", "k1"), "app:doc:token:k1");
    assert_eq!(keys.document_key("t", "x:%y"), "app:doc:t:x%3A%25y");
    assert_ne!(keys.document_key("t", "a%3Ab"), keys.document_key("t", "a:b"));

    let date = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
    let colliding = UsageKey {
        user_id: "u:1".to_string(),
        token_id: "t".to_string(),
        date,
    };
    let plain = UsageKey {
        user_id: "u".to_string(),
        token_id: "1:t".to_string(),
        date,
    };
    assert_ne!(keys.usage_key(&colliding), keys.usage_key(&plain));
    assert_eq!(keys.usage_key(&plain), "app:usage:u:2024-05-01:1%3At");
}
