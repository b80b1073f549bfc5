use std::fmt::Debug;
use std::hash::Hash;

/// Which branch a toggle took, as reported by the server or guessed locally.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToggleStatus {
    Added,
    Removed,
}

impl ToggleStatus {
    pub fn inverse(self) -> Self {
        match self {
            ToggleStatus::Added => ToggleStatus::Removed,
            ToggleStatus::Removed => ToggleStatus::Added,
        }
    }
}

/// What a toggle flips.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ToggleMode {
    /// The item enters or leaves the collection (wishlist entries).
    Membership,
    /// The item stays; its weight goes between zero and non-zero (read flags).
    Flag,
}

/// Describes one kind of synchronized record.
///
/// An item's weight is its contribution to the collection's aggregate. After
/// `set_weight(item, w)`, `weight(item)` should report `w` for every weight the
/// resource can represent; resources that can't represent a weight (a wishlist
/// entry always weighs one) may ignore the call, and the store measures the
/// result instead of trusting it.
pub trait Resource: 'static {
    type Id: Clone + Eq + Hash + Debug;
    type Item: Clone + Debug;

    /// Used in logs.
    const NAME: &'static str;
    const TOGGLE_MODE: ToggleMode;

    fn id(item: &Self::Item) -> Self::Id;

    fn weight(item: &Self::Item) -> u64;

    fn set_weight(item: &mut Self::Item, weight: u64);

    /// Stand-in shown while an optimistic add is in flight.
    /// Resources without one show nothing until the server answers.
    fn placeholder(_id: &Self::Id) -> Option<Self::Item> {
        None
    }
}
