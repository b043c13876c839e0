pub mod browser;
pub mod cancel;
pub mod contacts;
pub mod debug;
pub mod dedup;
pub mod exit;
pub mod extractor;
pub mod folders;
pub mod harvester;
pub mod mailer;
pub mod matcher;
pub mod models;
pub mod normalize;
pub mod pipeline;
pub mod product_page;
pub mod qr;
pub mod retry;
pub mod sites;
pub mod spreadsheet;
pub mod tui;
pub mod vision;
