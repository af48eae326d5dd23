pub mod feature;
pub mod feed;
pub mod modulation;
pub mod modulator;
pub mod range;
pub mod rig;
pub mod selection;
