use std::path::PathBuf;

/// Errors raised at the native engine boundary.
#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error("could not load engine library {name} (searched: {searched:?})")]
    LibraryNotFound {
        name: String,
        searched: Vec<PathBuf>,
        #[source]
        source: libloading::Error,
    },

    #[error("engine library is missing entry point `{symbol}`")]
    MissingSymbol {
        symbol: &'static str,
        #[source]
        source: libloading::Error,
    },

    #[error("engine returned a null {what}")]
    NullHandle { what: &'static str },
}
