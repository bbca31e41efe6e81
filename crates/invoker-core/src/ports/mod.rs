//! Ports - 外部システムとの境界
//!
//! 各 trait は外部システム（ここでは control plane）へのインターフェースを提供し、
//! 実装の詳細を隠蔽します。

pub mod control_plane;

pub use self::control_plane::{ClientError, ControlPlane};
