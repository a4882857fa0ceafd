//! Shared hardware context and owned SDK handles.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bcm_sdk::{BcmResult, BcmSdk, Handle, HandleKind};

use crate::audit::{AuditCategory, AuditOutcome, AuditRecord};
use crate::config::HalConfig;
use crate::error::check_fatal;
use crate::{audit_log, debug_log, error_log};

/// What every hardware object needs: the SDK unit, the config and whether
/// the agent is exiting for a warm boot.
pub struct HwContext {
    sdk: Arc<dyn BcmSdk>,
    config: HalConfig,
    exiting: AtomicBool,
}

impl HwContext {
    pub fn new(sdk: Arc<dyn BcmSdk>, config: HalConfig) -> Arc<Self> {
        Arc::new(Self {
            sdk,
            config,
            exiting: AtomicBool::new(false),
        })
    }

    pub fn sdk(&self) -> &dyn BcmSdk {
        self.sdk.as_ref()
    }

    pub fn config(&self) -> &HalConfig {
        &self.config
    }

    /// Once set, dropped objects leave their hardware state in place so the
    /// next agent instance can adopt it.
    pub fn set_exiting(&self) {
        self.exiting.store(true, Ordering::SeqCst);
    }

    pub fn is_exiting(&self) -> bool {
        self.exiting.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for HwContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HwContext")
            .field("config", &self.config)
            .field("exiting", &self.is_exiting())
            .finish_non_exhaustive()
    }
}

/// Destroy call of one SDK object kind.
pub type DestroyFn<K> = fn(&dyn BcmSdk, Handle<K>) -> BcmResult<()>;

/// Unique owner of an SDK object. Dropping it destroys the object unless the
/// agent is exiting for a warm boot.
///
/// A failed destroy is fatal: a half-released object cannot be unwound.
pub struct Owned<K: HandleKind> {
    ctx: Arc<HwContext>,
    handle: Handle<K>,
    what: &'static str,
    destroy: DestroyFn<K>,
}

impl<K: HandleKind> Owned<K> {
    pub fn new(
        ctx: Arc<HwContext>,
        handle: Handle<K>,
        what: &'static str,
        destroy: DestroyFn<K>,
    ) -> Self {
        Self {
            ctx,
            handle,
            what,
            destroy,
        }
    }

    pub fn handle(&self) -> Handle<K> {
        self.handle
    }

    pub fn ctx(&self) -> &Arc<HwContext> {
        &self.ctx
    }
}

impl<K: HandleKind> fmt::Debug for Owned<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Owned<{}>({:?})", self.what, self.handle)
    }
}

impl<K: HandleKind> Drop for Owned<K> {
    fn drop(&mut self) {
        if self.ctx.is_exiting() {
            debug_log!("Owned", handle = %self.handle, "keeping {} for warm boot", self.what);
            return;
        }
        if std::thread::panicking() {
            error_log!(
                "Owned",
                handle = %self.handle,
                "not destroying {} while unwinding",
                self.what
            );
            return;
        }
        check_fatal(
            self.what,
            (self.destroy)(self.ctx.sdk(), self.handle),
            format_args!("failed to destroy {} {}", self.what, self.handle),
        );
        audit_log!(AuditRecord::new(AuditCategory::ResourceDelete, self.what, "destroy")
            .with_outcome(AuditOutcome::Success)
            .with_object_type(self.what)
            .with_object_id(self.handle.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bcm_sdk::api::FieldApi;
    use bcm_sdk::{AclEntryHandle, FakeSdk, FieldEntryKind};

    fn entry(ctx: &Arc<HwContext>) -> Owned<FieldEntryKind> {
        let handle = ctx.sdk().entry_create(1).unwrap();
        Owned::new(ctx.clone(), handle, "acl entry", |sdk, h| sdk.entry_destroy(h))
    }

    #[test]
    fn test_drop_destroys_handle() {
        let sdk = Arc::new(FakeSdk::new());
        let ctx = HwContext::new(sdk.clone(), HalConfig::default());

        let owned = entry(&ctx);
        let handle: AclEntryHandle = owned.handle();
        assert!(sdk.entry_exists(handle));

        drop(owned);
        assert!(!sdk.entry_exists(handle));
    }

    #[test]
    fn test_exiting_keeps_handle() {
        let sdk = Arc::new(FakeSdk::new());
        let ctx = HwContext::new(sdk.clone(), HalConfig::default());

        let owned = entry(&ctx);
        let handle = owned.handle();
        ctx.set_exiting();
        drop(owned);

        assert!(sdk.entry_exists(handle));
    }

    #[test]
    #[should_panic(expected = "failed to destroy acl entry")]
    fn test_failed_destroy_is_fatal() {
        let sdk = Arc::new(FakeSdk::new());
        let ctx = HwContext::new(sdk.clone(), HalConfig::default());

        let owned = entry(&ctx);
        sdk.fail_next("entry_destroy", bcm_sdk::BcmStatus::Internal);
        drop(owned);
    }
}
