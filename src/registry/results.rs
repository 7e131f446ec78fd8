//! Per-item result aggregation
//!
//! Every operation produces one [`ItemResult`] per requested key, whether it
//! was invoked for a single key or a batch. Single-item entry points unwrap
//! the lone result with [`ItemResult::into_result`].

use super::errors::{ErrorKind, RegistryError, RegistryResult};
use super::key::ObjectKey;

/// Outcome of one item
#[derive(Debug)]
pub enum Outcome<T> {
    /// Completed
    Ok(T),
    /// Completed by replacing an existing record
    Overwritten(T),
    /// Key already existed and the conflict policy said skip
    Skipped,
    /// Key has no record
    NotFound,
    /// Item failed
    Error(RegistryError),
}

impl<T> Outcome<T> {
    fn label(&self) -> &'static str {
        match self {
            Outcome::Ok(_) => "ok",
            Outcome::Overwritten(_) => "overwritten",
            Outcome::Skipped => "skipped",
            Outcome::NotFound => "not_found",
            Outcome::Error(_) => "error",
        }
    }
}

/// Outcome for one requested `(name, version)`
#[derive(Debug)]
pub struct ItemResult<T> {
    pub key: ObjectKey,
    pub outcome: Outcome<T>,
}

impl<T> ItemResult<T> {
    pub fn ok(key: ObjectKey, value: T) -> Self {
        Self {
            key,
            outcome: Outcome::Ok(value),
        }
    }

    pub fn overwritten(key: ObjectKey, value: T) -> Self {
        Self {
            key,
            outcome: Outcome::Overwritten(value),
        }
    }

    pub fn skipped(key: ObjectKey) -> Self {
        Self {
            key,
            outcome: Outcome::Skipped,
        }
    }

    pub fn not_found(key: ObjectKey) -> Self {
        Self {
            key,
            outcome: Outcome::NotFound,
        }
    }

    pub fn failed(key: ObjectKey, error: RegistryError) -> Self {
        // Keep not-found distinguishable from other failures
        let outcome = match error {
            RegistryError::NotFound { .. } => Outcome::NotFound,
            other => Outcome::Error(other),
        };
        Self { key, outcome }
    }

    /// Build from a fallible item computation
    pub fn from_result(key: ObjectKey, result: RegistryResult<T>) -> Self {
        match result {
            Ok(value) => Self::ok(key, value),
            Err(e) => Self::failed(key, e),
        }
    }

    /// `ok` or `ok-overwritten`
    pub fn is_ok(&self) -> bool {
        matches!(self.outcome, Outcome::Ok(_) | Outcome::Overwritten(_))
    }

    pub fn is_overwritten(&self) -> bool {
        matches!(self.outcome, Outcome::Overwritten(_))
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self.outcome, Outcome::Skipped)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.outcome, Outcome::NotFound)
    }

    /// Short status label (`ok`, `overwritten`, `skipped`, `not_found`, `error`)
    pub fn status(&self) -> &'static str {
        self.outcome.label()
    }

    /// Error classification, if the item failed
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match &self.outcome {
            Outcome::Error(e) => Some(e.kind()),
            Outcome::NotFound => Some(ErrorKind::NotFound),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&RegistryError> {
        match &self.outcome {
            Outcome::Error(e) => Some(e),
            _ => None,
        }
    }

    pub fn value(&self) -> Option<&T> {
        match &self.outcome {
            Outcome::Ok(v) | Outcome::Overwritten(v) => Some(v),
            _ => None,
        }
    }

    /// Transform the success value, keeping the outcome
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ItemResult<U> {
        let outcome = match self.outcome {
            Outcome::Ok(v) => Outcome::Ok(f(v)),
            Outcome::Overwritten(v) => Outcome::Overwritten(f(v)),
            Outcome::Skipped => Outcome::Skipped,
            Outcome::NotFound => Outcome::NotFound,
            Outcome::Error(e) => Outcome::Error(e),
        };
        ItemResult {
            key: self.key,
            outcome,
        }
    }

    /// Unwrap for a single-item call.
    ///
    /// Skipped items surface as conflicts and missing items as not-found
    /// errors, so single-item callers always see a raised failure.
    pub fn into_result(self) -> RegistryResult<T> {
        match self.outcome {
            Outcome::Ok(v) | Outcome::Overwritten(v) => Ok(v),
            Outcome::Skipped => Err(RegistryError::conflict(&self.key.name, &self.key.version)),
            Outcome::NotFound => Err(RegistryError::not_found(&self.key.name, &self.key.version)),
            Outcome::Error(e) => Err(e),
        }
    }
}

/// Ordered collection of item results; order matches the request
#[derive(Debug)]
pub struct BatchResult<T> {
    items: Vec<ItemResult<T>>,
}

impl<T> BatchResult<T> {
    pub fn new(items: Vec<ItemResult<T>>) -> Self {
        Self { items }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ItemResult<T>> {
        self.items.iter()
    }

    pub fn get(&self, index: usize) -> Option<&ItemResult<T>> {
        self.items.get(index)
    }

    /// Result for a specific key
    pub fn find(&self, name: &str, version: &str) -> Option<&ItemResult<T>> {
        self.items
            .iter()
            .find(|r| r.key.name == name && r.key.version == version)
    }

    pub fn all_ok(&self) -> bool {
        self.items.iter().all(ItemResult::is_ok)
    }

    pub fn ok_count(&self) -> usize {
        self.items.iter().filter(|r| r.is_ok()).count()
    }

    /// Items that neither succeeded nor were skipped
    pub fn failures(&self) -> impl Iterator<Item = &ItemResult<T>> {
        self.items
            .iter()
            .filter(|r| !r.is_ok() && !r.is_skipped())
    }

    pub fn map<U>(self, mut f: impl FnMut(T) -> U) -> BatchResult<U> {
        BatchResult {
            items: self.items.into_iter().map(|r| r.map(&mut f)).collect(),
        }
    }

    pub fn into_items(self) -> Vec<ItemResult<T>> {
        self.items
    }

    /// Unwrap the result of a one-element batch
    pub fn into_single(self) -> RegistryResult<ItemResult<T>> {
        let count = self.items.len();
        let mut items = self.items.into_iter();
        match (items.next(), items.next()) {
            (Some(item), None) => Ok(item),
            _ => Err(RegistryError::InvalidArgument(format!(
                "expected exactly one result, got {}",
                count
            ))),
        }
    }
}

impl<T> IntoIterator for BatchResult<T> {
    type Item = ItemResult<T>;
    type IntoIter = std::vec::IntoIter<ItemResult<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'a, T> IntoIterator for &'a BatchResult<T> {
    type Item = &'a ItemResult<T>;
    type IntoIter = std::slice::Iter<'a, ItemResult<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

impl<T> From<Vec<ItemResult<T>>> for BatchResult<T> {
    fn from(items: Vec<ItemResult<T>>) -> Self {
        BatchResult::new(items)
    }
}

impl<T> FromIterator<ItemResult<T>> for BatchResult<T> {
    fn from_iter<I: IntoIterator<Item = ItemResult<T>>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> ObjectKey {
        ObjectKey::new(name, "1")
    }

    #[test]
    fn test_single_unwrap_semantics() {
        assert_eq!(ItemResult::ok(key("a"), 5).into_result().unwrap(), 5);
        assert_eq!(ItemResult::overwritten(key("a"), 6).into_result().unwrap(), 6);
        assert!(matches!(
            ItemResult::<()>::skipped(key("a")).into_result(),
            Err(RegistryError::Conflict { .. })
        ));
        assert!(matches!(
            ItemResult::<()>::not_found(key("a")).into_result(),
            Err(RegistryError::NotFound { .. })
        ));
    }

    #[test]
    fn test_failed_not_found_is_classified() {
        let item = ItemResult::<()>::failed(key("a"), RegistryError::not_found("a", "1"));
        assert!(item.is_not_found());
        assert_eq!(item.error_kind(), Some(ErrorKind::NotFound));

        let item = ItemResult::<()>::failed(key("a"), RegistryError::conflict("a", "1"));
        assert_eq!(item.status(), "error");
        assert_eq!(item.error_kind(), Some(ErrorKind::Conflict));
    }

    #[test]
    fn test_batch_preserves_order_and_counts() {
        let batch: BatchResult<u32> = vec![
            ItemResult::ok(key("a"), 1),
            ItemResult::skipped(key("b")),
            ItemResult::failed(key("c"), RegistryError::InvalidArgument("x".into())),
        ]
        .into_iter()
        .collect();

        let names: Vec<_> = batch.iter().map(|r| r.key.name.clone()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(batch.ok_count(), 1);
        assert!(!batch.all_ok());
        assert_eq!(batch.failures().count(), 1);
        assert!(batch.find("b", "1").unwrap().is_skipped());
    }

    #[test]
    fn test_into_single_requires_one_item() {
        let empty: BatchResult<()> = BatchResult::new(Vec::new());
        assert!(empty.into_single().is_err());

        let one = BatchResult::new(vec![ItemResult::ok(key("a"), ())]);
        assert!(one.into_single().unwrap().is_ok());
    }
}
