pub mod system;
pub mod voice;
