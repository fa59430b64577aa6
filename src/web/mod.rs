pub mod extproc;
pub mod openai;
pub mod responses;
