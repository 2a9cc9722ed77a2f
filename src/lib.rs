pub mod accounts;
pub mod api;
pub mod config;
pub mod error;
pub mod events;
pub mod extract;
pub mod integrity;
pub mod ops;
pub mod reporter;
pub mod session;
pub mod state;
pub mod types;
pub mod worker;

/// Private GraphQL endpoint used by the web player.
pub const GQL_URL: &str = "https://gql.twitch.tv/gql";

/// Public web client id sent as `Client-ID` on every GraphQL request.
pub const WEB_CLIENT_ID: &str = "kimne78kx3ncx6brgo4mv6wki5h1ko";

/// Channel pages, scraped for the spade beacon URL.
pub const CHANNEL_PAGE_BASE: &str = "https://www.twitch.tv";

/// HLS playlist host used by the simulated player.
pub const USHER_BASE: &str = "https://usher.ttvnw.net/api/channel/hls";

/// Browser user agent presented by the API client.
pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";
