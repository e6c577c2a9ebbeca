//! Inverted postings: term dictionary, frequency/position streams and skip
//! checkpoints.

pub mod reader;
pub mod skip;
pub mod term_dict;
pub mod writer;

pub use reader::{PostingsEnum, PostingsReader};
pub use skip::{SkipEntry, SkipListWriter};
pub use term_dict::{TermDictWriter, TermDictionary, TermEntry};
pub use writer::PostingsWriter;
