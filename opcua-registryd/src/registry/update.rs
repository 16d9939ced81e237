use std::time::Duration;
use crate::error::{RegistryError, Result};
use crate::registration::Registration;
use super::context::OperationContext;
use super::Registry;

/// Backoff between optimistic-concurrency retries.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_delay: Duration::from_millis(20),
            max_delay: Duration::from_secs(2),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay after the given failed attempt (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs)
    }
}

/// Result of one read-modify-write cycle.
#[derive(Debug, Clone)]
pub(crate) struct EntityUpdate<T, R> {
    pub previous: T,
    pub current: T,
    pub patched: bool,
    pub extra: R,
}

impl Registry {
    /// Read the entity, let `updater` edit it and write back only the changed
    /// fields under the etag that was read. Etag conflicts restart the cycle
    /// with exponential backoff until `max_attempts` is reached.
    pub(crate) async fn update_entity<T, R, F>(
        &self,
        ctx: &OperationContext,
        id: &str,
        module_id: Option<&str>,
        mut updater: F,
    ) -> Result<EntityUpdate<T, R>>
    where
        T: Registration,
        R: Send,
        F: FnMut(&mut T) -> Result<(bool, R)> + Send,
    {
        let retry = &self.settings.retry;
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let twin = ctx.run(self.store.get(id, module_id)).await?;
            let previous = T::from_twin(&twin)
                .ok_or_else(|| RegistryError::NotFound(format!("{} {}", T::DEVICE_TYPE, id)))?;

            let mut desired = previous.clone();
            let (should_patch, extra) = updater(&mut desired)?;
            let mut patch = previous.to_twin().patch_to(&desired.to_twin());
            if !should_patch || patch.is_empty_patch() {
                return Ok(EntityUpdate {
                    current: previous.clone(),
                    previous,
                    patched: false,
                    extra,
                });
            }
            patch.id = twin.id.clone();
            patch.module_id = twin.module_id.clone();

            match ctx.run(self.store.patch(patch, twin.etag.clone(), false)).await {
                Ok(updated) => {
                    let current = T::from_twin(&updated).unwrap_or(desired);
                    return Ok(EntityUpdate {
                        previous,
                        current,
                        patched: true,
                        extra,
                    });
                }
                Err(RegistryError::OutOfDate(_)) if attempt < retry.max_attempts => {
                    let delay = retry.delay_for_attempt(attempt);
                    tracing::debug!(id, attempt, ?delay, "Twin changed concurrently, retrying update");
                    tokio::select! {
                        _ = ctx.cancel.cancelled() => return Err(RegistryError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(RegistryError::OutOfDate(_)) => {
                    tracing::warn!(id, attempt, "Giving up update after repeated conflicts");
                    return Err(RegistryError::Contention {
                        id: id.to_string(),
                        attempts: attempt,
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use shared::types::ApplicationInfo;
    use crate::registry::testing::{test_app, TestRegistry};

    #[test]
    fn test_exponential_delay_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            multiplier: 2.0,
        };
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(40), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_update_retries_after_conflict() {
        let t = TestRegistry::new().await;
        let app = t.insert_app(test_app("urn:plc:1", "s1", Some("d1"))).await;
        t.store.fail_next_patches_out_of_date(2);

        let ctx = t.ctx();
        let mut calls = 0;
        let update = t
            .registry
            .update_entity::<ApplicationInfo, _, _>(&ctx, &app.application_id, None, |current| {
                calls += 1;
                current.not_seen_since = Some(Utc::now());
                Ok((true, ()))
            })
            .await
            .unwrap();

        assert!(update.patched);
        assert_eq!(calls, 3, "updater runs once per read");
        assert!(update.current.not_seen_since.is_some());
    }

    #[tokio::test]
    async fn test_update_surfaces_contention() {
        let t = TestRegistry::new().await;
        let app = t.insert_app(test_app("urn:plc:1", "s1", Some("d1"))).await;
        t.store.fail_next_patches_out_of_date(100);

        let err = t
            .registry
            .update_entity::<ApplicationInfo, _, _>(&t.ctx(), &app.application_id, None, |current| {
                current.discoverer_id = Some("d2".to_string());
                Ok((true, ()))
            })
            .await
            .unwrap_err();

        assert!(matches!(err, RegistryError::Contention { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn test_update_without_change_does_not_write() {
        let t = TestRegistry::new().await;
        let app = t.insert_app(test_app("urn:plc:1", "s1", Some("d1"))).await;
        let before = t.store.patch_count();

        let update = t
            .registry
            .update_entity::<ApplicationInfo, _, _>(&t.ctx(), &app.application_id, None, |current| {
                current.discoverer_id = Some("d1".to_string());
                Ok((true, ()))
            })
            .await
            .unwrap();

        assert!(!update.patched);
        assert_eq!(t.store.patch_count(), before);
    }

    #[tokio::test]
    async fn test_update_missing_entity() {
        let t = TestRegistry::new().await;
        let err = t
            .registry
            .update_entity::<ApplicationInfo, _, _>(&t.ctx(), "uat-missing", None, |_| Ok((true, ())))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::NotFound(_)));
    }
}
