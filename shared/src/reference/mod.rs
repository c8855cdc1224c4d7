mod endpoint;
mod id_generator;
mod reference_id;

pub use endpoint::{Endpoint, ENDPOINT_ID_LENGTH};
pub use id_generator::{ReferenceIdGenerator, ID_EPOCH_SECONDS};
pub use reference_id::{
    AddressType, ReferenceId, DEFAULT_ID_LENGTH, PREFIX_ID_LENGTH, STATIC_ID_LENGTH,
};
