//! Core functionality: image embeddings and similarity scoring

/// Loads the pretrained model and turns images into embedding vectors.
pub mod embeddings;
/// Cosine similarity and threshold classification.
pub mod similarity;
