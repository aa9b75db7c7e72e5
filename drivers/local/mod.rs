//! Local filesystem FileIO / 本地文件系统

pub mod driver;

pub use driver::LocalFileIO;
