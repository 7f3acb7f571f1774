//! Reference models, created by kind name from a JSON config.

use crate::traits::Model;
use serde_json::Value;

pub mod beacon;
pub mod mobility;
pub mod sink;

pub use beacon::{Beacon, BeaconConfig};
pub use mobility::{LinearMobility, MobilityConfig, StaticPosition};
pub use sink::{ReceptionRecord, Sink, SinkConfig};

macro_rules! register_models {
    ($($kind:expr => $type:ty),* $(,)?) => {
        /// Builds a model from its kind name. A null config keeps the
        /// defaults; a malformed or invalid one is an error.
        pub fn create_model(kind: &str, data: Value) -> crate::error::Result<Option<Box<dyn Model>>> {
            match kind {
                $(
                    $kind => {
                        let mut obj: $type = Default::default();
                        if !data.is_null() {
                            obj.config = serde_json::from_value(data)?;
                        }
                        obj.config.validate()?;
                        Ok(Some(Box::new(obj)))
                    }
                )*
                _ => Ok(None),
            }
        }

        pub fn model_kinds() -> Vec<&'static str> {
            vec![$($kind),*]
        }
    };
}

register_models!(
    "Beacon" => beacon::Beacon,
    "Sink" => sink::Sink,
);
