pub mod language;

pub use language::{negotiate, negotiate_language, CurrentLanguage, LanguageSettings};
