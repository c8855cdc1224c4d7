mod codec;
mod crypto;
mod message;

pub use codec::{Codec, WireCodec};
pub use crypto::{Crypto, PlainCrypto, SignedFrame};
pub use message::{
    Envelope, Message, ReferenceSnapshot, RefusalReason, SubscribeOutcome, UpdateAction,
    UpdateBatch, UpdateFragment,
};
