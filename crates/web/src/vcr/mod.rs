//! Record/replay of outbound HTTP around test requests
//!
//! Two ways to scope a cassette:
//! - [`VcrUseCassetteLayer`] wraps every request in its own cassette
//! - [`VcrInsertEjectLayer`] lets the test insert and eject explicitly

pub mod cassette;
pub mod insert_eject;
pub mod options;
pub mod recorder;
pub mod use_cassette;

pub use cassette::{Cassette, Interaction, RecordedBody, RecordedHeaders, RecordedRequest, RecordedResponse};
pub use insert_eject::VcrInsertEjectLayer;
pub use options::{CassetteOptions, MatchOn, RecordMode};
pub use recorder::Recorder;
pub use use_cassette::{cassette_name, VcrUseCassetteLayer};
