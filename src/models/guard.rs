//! Deletion guards: the marker whose presence keeps the control plane from
//! physically removing a bucket resource.

use crate::models::bucket::BucketResource;

/// Which marker on the resource acts as the deletion guard.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GuardMarker {
    /// A named token in `metadata.finalizers`. Released by rewriting the list
    /// without the token.
    Finalizer(String),

    /// A boolean annotation (`"true"` enables it). The annotation is owned by
    /// whoever set it, so there is no release step on our side.
    Annotation(String),
}

impl GuardMarker {
    pub fn is_present(&self, resource: &BucketResource) -> bool {
        match self {
            GuardMarker::Finalizer(token) => resource.finalizers.iter().any(|f| f == token),
            GuardMarker::Annotation(key) => resource
                .annotations
                .get(key)
                .is_some_and(|value| value == "true"),
        }
    }

    /// The finalizer list to write back once the bucket is empty.
    ///
    /// Returns `None` when this guard has no release step.
    pub fn released_finalizers(&self, resource: &BucketResource) -> Option<Vec<String>> {
        match self {
            GuardMarker::Finalizer(token) => Some(remove_token(&resource.finalizers, token)),
            GuardMarker::Annotation(_) => None,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            GuardMarker::Finalizer(token) => token,
            GuardMarker::Annotation(key) => key,
        }
    }
}

/// Drop every occurrence of `token`, keeping the remaining tokens in order.
pub fn remove_token(tokens: &[String], token: &str) -> Vec<String> {
    tokens.iter().filter(|t| *t != token).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn remove_token_preserves_order() {
        let tokens = strings(&["a", "finalizers.example/EmptyBucket", "b", "c"]);
        assert_eq!(
            remove_token(&tokens, "finalizers.example/EmptyBucket"),
            strings(&["a", "b", "c"])
        );
    }

    #[test]
    fn remove_absent_token_is_noop() {
        let tokens = strings(&["a", "b"]);
        assert_eq!(remove_token(&tokens, "missing"), tokens);
        assert!(remove_token(&[], "missing").is_empty());
    }

    #[test]
    fn remove_token_is_idempotent() {
        let tokens = strings(&["x", "guard", "y", "guard"]);
        let once = remove_token(&tokens, "guard");
        assert_eq!(once, strings(&["x", "y"]));
        assert_eq!(remove_token(&once, "guard"), once);
    }

    #[test]
    fn annotation_guard_requires_true() {
        let guard = GuardMarker::Annotation("s3.services.k8s.aws/empty-on-delete".into());
        let mut res = BucketResource::default();
        assert!(!guard.is_present(&res));

        res.annotations
            .insert("s3.services.k8s.aws/empty-on-delete".into(), "false".into());
        assert!(!guard.is_present(&res));

        res.annotations
            .insert("s3.services.k8s.aws/empty-on-delete".into(), "true".into());
        assert!(guard.is_present(&res));
        assert_eq!(guard.released_finalizers(&res), None);
    }

    #[test]
    fn finalizer_guard_release() {
        let guard = GuardMarker::Finalizer("guard".into());
        let res = BucketResource {
            finalizers: strings(&["first", "guard", "last"]),
            ..Default::default()
        };
        assert!(guard.is_present(&res));
        assert_eq!(
            guard.released_finalizers(&res),
            Some(strings(&["first", "last"]))
        );
    }
}
