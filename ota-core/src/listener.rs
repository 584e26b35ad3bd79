/// Hooks invoked synchronously at update state transitions.
///
/// All methods default to no-ops so a listener only implements what it
/// needs.
pub trait UpdateListener {
    /// Before the sink is prepared for a new session.
    fn on_start(&mut self) {}

    /// After every accepted non-empty chunk. `total` is `None` when the
    /// target size is unknown.
    fn on_progress(&mut self, _current: usize, _total: Option<usize>) {}

    /// When a session completes (`true`) or fails (`false`).
    fn on_end(&mut self, _success: bool) {}
}
