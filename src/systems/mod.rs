mod disaster;
mod economy;

pub use disaster::DisasterSystem;
pub use economy::EconomySystem;
