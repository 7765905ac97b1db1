//! Reading, editing and writing the portrait archive (`kaomado.kao`) of
//! Pokémon Mystery Dungeon: Explorers of Sky.

pub mod binary_utils;
pub mod config;
pub mod containers;
pub mod error;
pub mod formats;
pub mod graphics;

pub use config::KaoConfig;
pub use error::{KaoError, Result};
pub use graphics::kao::codec::{At4pxCodec, PortraitCodec};
pub use graphics::kao::portrait::KaoImage;
pub use graphics::kao::{Kao, KaoIter, Palette, SUBENTRIES};
