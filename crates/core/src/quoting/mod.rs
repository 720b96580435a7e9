pub mod causes;
pub mod policy;

pub use causes::possible_causes;
pub use policy::{DeterministicServicePolicy, ServicePolicy, ServicePolicyInput};
