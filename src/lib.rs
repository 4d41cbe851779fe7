#[macro_export]
macro_rules! debug_log {
	($($arg:tt)*) => {{
		#[cfg(debug_assertions)]
		{
			eprintln!($($arg)*);
		}
	}};
}

pub mod config;
pub mod diffmap;
pub mod enclosing;
pub mod engine;
pub mod error;
pub mod hunks;
pub mod imports;
pub mod inspector;
pub mod prefilter;
pub mod query;
pub mod scanner;
pub mod slicer;
