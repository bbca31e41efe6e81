//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **HttpControlPlane**: reqwest による control plane クライアント

pub mod http_control_plane;

pub use self::http_control_plane::HttpControlPlane;
