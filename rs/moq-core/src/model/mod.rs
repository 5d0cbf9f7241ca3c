mod broadcast;
mod frame;
mod group;
mod produce;
mod state;
mod track;

pub use broadcast::*;
pub use frame::*;
pub use group::*;
pub use produce::*;
pub use track::*;

pub(crate) use state::*;
