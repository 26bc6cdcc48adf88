//! TPM 2.0 CRB transport and the TPM2 command subset the secure store needs: policy sessions
//! bound to PCR 7, primary-key/sealed-object creation, load/unseal, PCR extend (§4.14).
#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod control_area;
mod error;
pub mod tpm2;
mod wire;
pub mod wrap_blob;

pub use control_area::{CrbControlArea, CrbTransport, PhysMapper};
pub use error::TpmError;
pub use wrap_blob::{seal_wrap_key, unseal_wrap_key};
