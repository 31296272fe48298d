pub mod catalog_http;
pub mod itunes_catalog;
pub mod metadata_resolver;
pub mod musicbrainz_lookup;
pub mod resolution_cache;
pub mod text_match;
