pub mod licenses_csv;
pub mod usage_csv;
