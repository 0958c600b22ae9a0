//! 基础设施层
//!
//! 持有稀缺资源（浏览器页面），只暴露能力

pub mod page;
pub mod page_driver;

pub use page::{js_string, BrowserPage, ElementState, PageOptions, PageSource, SessionCookie};
pub use page_driver::PageDriver;
