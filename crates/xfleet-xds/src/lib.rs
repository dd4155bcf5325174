pub mod proto {
    tonic::include_proto!("xfleet.ads.v1");
}
pub use proto::*;

pub mod bootstrap;
pub mod engine;
pub mod identity;

mod errors;
pub use errors::XdsError;
