//! Browser Connector for the site archiver
//!
//! Provides the two fetch strategies used while crawling:
//! - rendering fetch through a Chromium browser driven over the
//!   Chrome DevTools Protocol (post-script markup and title)
//! - raw fetch over plain HTTP, used for link discovery and asset downloads

pub mod traits;
pub mod cdp;
pub mod http;

pub use traits::*;
pub use cdp::{CdpConfig, CdpRenderer, CdpSession, CdpTarget, CdpVersion};
pub use http::{HttpFetcher, DEFAULT_USER_AGENT};
