//! Cross-module tests.

mod rag_ranking;
