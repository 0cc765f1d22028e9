pub mod calculated_data;
pub mod converters;
pub mod hydrate;
pub mod insert_queue;
pub mod pb;
pub mod profile;
pub mod score_id;
pub mod score_utils;
