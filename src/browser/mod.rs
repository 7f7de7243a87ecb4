pub mod connection;
pub mod headless;

pub use connection::connect_to_browser;
pub use headless::launch_headless_browser;

use anyhow::Result;
use chromiumoxide::Browser;

/// 打开浏览器：端口为 0 时启动无头浏览器，否则连接已有实例
pub async fn open_browser(debug_port: u16) -> Result<Browser> {
    if debug_port == 0 {
        launch_headless_browser().await
    } else {
        connect_to_browser(debug_port).await
    }
}
