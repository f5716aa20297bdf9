//! Document identity and merge seam.

/// A document stored in a named database.
///
/// Replication is asynchronous and non-atomic: two replicas may write the
/// same document id without observing each other first. `merge_from` decides
/// how an incoming revision combines with the local one. The default is
/// whole-document replacement, which is only safe for single-writer
/// documents; multi-writer documents must merge sub-keys instead.
pub trait Document: Clone + Send + Sync + 'static {
  /// Stable identity of this document within its database.
  fn id(&self) -> &str;

  /// Soft-deletion flag. Deleted documents still flow through the change
  /// feed so observers see the deletion as an event.
  fn deleted(&self) -> bool {
    false
  }

  /// Combine an incoming revision of the same document into `self`.
  fn merge_from(&mut self, incoming: Self) {
    *self = incoming;
  }
}
