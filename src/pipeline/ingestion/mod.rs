// Producers: uploaded documents and paginated upstream APIs

pub mod file_parsers;
pub mod kai_api;

pub use file_parsers::{parse_batch_manual, parse_eamusement_iidx_csv, parse_fervidex, ParsedImport};
pub use kai_api::{kai_import_context, KaiOAuthReauthenticator, KaiTraversal, Reauthenticator};
