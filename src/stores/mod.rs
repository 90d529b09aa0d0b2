pub mod chat;
pub mod directory;
pub mod sequence;

#[cfg(test)]
pub(crate) mod testing;
