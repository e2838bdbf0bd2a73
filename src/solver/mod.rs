pub mod descent;
pub mod recovery;
