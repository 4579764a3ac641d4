//! Reversible tokenization of sensitive substrings

mod model;
mod tokenizer;

pub use model::{
    RetentionClass, Sensitivity, TokenPurpose, TokenRecord, TokenSpan, TokenizationContext,
    TokenizationResult,
};
pub use tokenizer::{Tokenizer, TOKEN_PREFIX};
