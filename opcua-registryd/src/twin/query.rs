use chrono::{DateTime, Utc};
use serde_json::Value;
use super::model::{Twin, TwinKey};

/// Predicate over twin tags, evaluated by the store.
#[derive(Debug, Clone, PartialEq)]
pub enum TwinPredicate {
    Always,
    All(Vec<TwinPredicate>),
    Any(Vec<TwinPredicate>),
    Not(Box<TwinPredicate>),
    TagEquals(TwinKey, Value),
    TagPresent(TwinKey),
    /// Tag is an array containing the value
    TagContains(TwinKey, Value),
    /// Tag is an RFC 3339 timestamp strictly before the instant
    TagBefore(TwinKey, DateTime<Utc>),
}

impl TwinPredicate {
    pub fn device_type(device_type: &str) -> Self {
        Self::tag_eq(TwinKey::DeviceType, device_type)
    }

    pub fn tag_eq(key: TwinKey, value: impl Into<Value>) -> Self {
        TwinPredicate::TagEquals(key, value.into())
    }

    pub fn and(self, other: TwinPredicate) -> Self {
        match self {
            TwinPredicate::Always => other,
            TwinPredicate::All(mut all) => {
                all.push(other);
                TwinPredicate::All(all)
            }
            this => TwinPredicate::All(vec![this, other]),
        }
    }

    /// Device type every matching twin must have, if the predicate pins one.
    pub fn device_type_hint(&self) -> Option<&str> {
        match self {
            TwinPredicate::TagEquals(TwinKey::DeviceType, value) => value.as_str(),
            TwinPredicate::All(all) => all.iter().find_map(TwinPredicate::device_type_hint),
            _ => None,
        }
    }

    pub fn matches(&self, twin: &Twin) -> bool {
        match self {
            TwinPredicate::Always => true,
            TwinPredicate::All(all) => all.iter().all(|p| p.matches(twin)),
            TwinPredicate::Any(any) => any.iter().any(|p| p.matches(twin)),
            TwinPredicate::Not(inner) => !inner.matches(twin),
            TwinPredicate::TagEquals(key, value) => twin.tags.get(key) == Some(value),
            TwinPredicate::TagPresent(key) => twin.tags.get(key).is_some(),
            TwinPredicate::TagContains(key, value) => twin
                .tags
                .get(key)
                .and_then(Value::as_array)
                .is_some_and(|items| items.contains(value)),
            TwinPredicate::TagBefore(key, instant) => twin
                .tags
                .get_as::<DateTime<Utc>>(key)
                .is_some_and(|t| t < *instant),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn twin() -> Twin {
        let mut twin = Twin::new("uat1", None);
        twin.tags.set(TwinKey::DeviceType, "Application");
        twin.tags.set(TwinKey::SiteId, "s1");
        twin.tags.set(TwinKey::Capabilities, vec!["DA", "HD"]);
        twin.tags.set(TwinKey::NotSeenSince, Utc::now() - Duration::hours(2));
        twin
    }

    #[test]
    fn test_combinators() {
        let twin = twin();
        let p = TwinPredicate::device_type("Application").and(TwinPredicate::Any(vec![
            TwinPredicate::tag_eq(TwinKey::SiteId, "s2"),
            TwinPredicate::tag_eq(TwinKey::SiteId, "s1"),
        ]));
        assert!(p.matches(&twin));
        assert!(!TwinPredicate::Not(Box::new(p)).matches(&twin));
        assert!(!TwinPredicate::TagPresent(TwinKey::DiscovererId).matches(&twin));
    }

    #[test]
    fn test_contains_and_before() {
        let twin = twin();
        assert!(TwinPredicate::TagContains(TwinKey::Capabilities, "HD".into()).matches(&twin));
        assert!(!TwinPredicate::TagContains(TwinKey::Capabilities, "AC".into()).matches(&twin));
        assert!(TwinPredicate::TagBefore(TwinKey::NotSeenSince, Utc::now() - Duration::hours(1)).matches(&twin));
        assert!(!TwinPredicate::TagBefore(TwinKey::NotSeenSince, Utc::now() - Duration::hours(3)).matches(&twin));
    }
}
