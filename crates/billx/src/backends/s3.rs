//! 🪣🌐 S3 backend: the cloud half of the object store.
//!
//! INT. AWS CONSOLE, NIGHT. A bucket sits in some region nobody remembers
//! choosing, quietly collecting a new billing export every few hours. The
//! exporter never tells anyone. It just writes. We list, we locate, we read.
//!
//! 🧠 Knowledge graph:
//! - Config co-located: `S3ObjectStoreConfig` lives in `s3_object_store.rs`
//! - Trait impl: `impl ObjectStore for S3ObjectStore`
//! - Enum variant: `ObjectStoreBackend::S3(S3ObjectStore)`
//! - Credentials: `aws-config` chain, optionally through `AssumeRoleProvider`
//! - Transport: `GetObject` → `ByteStream::into_async_read()` → whoever asked
//!
//! 🦆 The duck has no clearance for AWS. It watches from the edge of the VPC.

mod s3_object_store;

pub(crate) use s3_object_store::S3ObjectStore;
pub use s3_object_store::S3ObjectStoreConfig;
