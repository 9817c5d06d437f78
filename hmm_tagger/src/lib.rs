#![cfg_attr(docsrs, feature(doc_cfg))]

//! # hmm_tagger
//!
//! A part-of-speech tagger based on a trigram hidden Markov model.
//!
//! Parameters are estimated from line-aligned tag and token files and stored as a plain-text
//! table. Sentences are decoded with the Viterbi algorithm over pairs of tags.
//!
//! ## Examples
//!
//! ```no_run
//! use std::fs::File;
//! use std::io::{prelude::*, stdin, BufReader};
//!
//! use hmm_tagger::{tokenize, Decoder, Model};
//!
//! let f = BufReader::new(File::open("model.hmm").unwrap());
//! let model = Model::read(f).unwrap();
//! let decoder = Decoder::new(&model);
//!
//! for line in stdin().lock().lines() {
//!     let line = line.unwrap();
//!     match decoder.decode(&tokenize(&line)) {
//!         Ok(tagging) => println!("{}", tagging.to_tagged_string()),
//!         Err(_) => println!(),
//!     }
//! }
//! ```
//!
//! Estimation requires **crate feature** `train`. For more details, see [`Estimator`].

mod utils;

mod decoder;
mod errors;
mod model;
mod sentence;
mod trellis;

#[cfg(feature = "train")]
mod estimator;

pub use decoder::{DecodeError, Decoder, DEFAULT_EMISSION_FLOOR, DEFAULT_STATE_BUDGET};
pub use errors::{HmmError, InvalidArgumentError, InvalidCorpusError, InvalidModelError, Result};
pub use model::{Model, TagId, WordId, FINAL_TAG, INIT_TAG, OOV_SYMBOL};
pub use sentence::{tokenize, CorpusReader, TaggedSentence, Tagging};

#[cfg(feature = "multithreading")]
pub use decoder::MultithreadDecoder;

#[cfg(feature = "train")]
pub use estimator::Estimator;
