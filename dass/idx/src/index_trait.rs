/// A key into a dense arena: position `index()` of the arena it was handed
/// out by.
pub trait IndexRef: Copy + Eq {
    fn index(&self) -> usize;
    /// The key for position `input`.
    fn new(input: usize) -> Self;
}
