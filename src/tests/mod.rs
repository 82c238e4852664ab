//! End-to-end tests over synthesized media
//!
//! - Demuxing, current-time tracking and seeking
//! - Decode → encode sample accounting
//! - Full transcodes, direct and through a filter graph
//! - The async job runner
