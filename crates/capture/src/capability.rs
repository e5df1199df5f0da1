//! Capability wiring
//!
//! Every external collaborator (encoders, landmark detectors, devices) is
//! resolved once at construction time into either a ready handle or a
//! "not configured" marker carrying the reason. Callers branch on the variant
//! instead of probing the collaborator on every call.

use std::fmt;
use std::sync::Arc;

/// A collaborator that is either available or explicitly not configured
pub enum Capability<T: ?Sized> {
    Ready(Arc<T>),
    NotConfigured { reason: String },
}

impl<T: ?Sized> Capability<T> {
    pub fn ready(inner: Arc<T>) -> Self {
        Capability::Ready(inner)
    }

    pub fn not_configured(reason: impl Into<String>) -> Self {
        Capability::NotConfigured {
            reason: reason.into(),
        }
    }

    /// Handle to the collaborator when configured
    pub fn get(&self) -> Option<&Arc<T>> {
        match self {
            Capability::Ready(inner) => Some(inner),
            Capability::NotConfigured { .. } => None,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Capability::Ready(_))
    }

    /// Reason the collaborator is unavailable
    pub fn reason(&self) -> Option<&str> {
        match self {
            Capability::Ready(_) => None,
            Capability::NotConfigured { reason } => Some(reason),
        }
    }
}

impl<T: ?Sized> Clone for Capability<T> {
    fn clone(&self) -> Self {
        match self {
            Capability::Ready(inner) => Capability::Ready(Arc::clone(inner)),
            Capability::NotConfigured { reason } => Capability::NotConfigured {
                reason: reason.clone(),
            },
        }
    }
}

impl<T: ?Sized> fmt::Debug for Capability<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Ready(_) => f.write_str("Ready"),
            Capability::NotConfigured { reason } => {
                f.debug_struct("NotConfigured").field("reason", reason).finish()
            }
        }
    }
}

impl<T: ?Sized> From<Option<Arc<T>>> for Capability<T> {
    fn from(value: Option<Arc<T>>) -> Self {
        match value {
            Some(inner) => Capability::Ready(inner),
            None => Capability::not_configured("no implementation supplied"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Encoder: Send + Sync {
        fn dim(&self) -> usize;
    }

    struct Fixed;

    impl Encoder for Fixed {
        fn dim(&self) -> usize {
            128
        }
    }

    #[test]
    fn test_ready_capability() {
        let cap: Capability<dyn Encoder> = Capability::ready(Arc::new(Fixed));
        assert!(cap.is_ready());
        assert_eq!(cap.get().map(|e| e.dim()), Some(128));
        assert!(cap.reason().is_none());
    }

    #[test]
    fn test_not_configured_capability() {
        let cap: Capability<dyn Encoder> = Capability::not_configured("model path missing");
        assert!(!cap.is_ready());
        assert!(cap.get().is_none());
        assert_eq!(cap.reason(), Some("model path missing"));
        assert!(format!("{:?}", cap).contains("model path missing"));
    }

    #[test]
    fn test_from_option() {
        let cap: Capability<dyn Encoder> = None.into();
        assert!(!cap.is_ready());
    }
}
