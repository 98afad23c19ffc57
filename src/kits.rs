//! Kit 目录：kit 标识 → 按钮所在的世界坐标
//!
//! 启动时从配置 `[kits.<id>]` 加载一次，之后只读；未配置时使用内置目录。
//! 查找不区分大小写（聊天触发词统一按小写比较）。

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// 世界坐标（三分量）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Coordinate {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "X={:.2}, Y={:.2}, Z={:.2}", self.x, self.y, self.z)
    }
}

/// 单个 kit：标识 + 按钮坐标
#[derive(Debug, Clone, PartialEq)]
pub struct KitDefinition {
    pub id: String,
    pub coords: Coordinate,
}

/// 静态 kit 目录
#[derive(Debug, Clone, Default)]
pub struct KitCatalog {
    kits: Vec<KitDefinition>,
}

impl KitCatalog {
    /// 由 (id, 坐标) 列表构建；忽略大小写重复的 id（保留先出现者）
    pub fn new(kits: impl IntoIterator<Item = KitDefinition>) -> Self {
        let mut out: Vec<KitDefinition> = Vec::new();
        for kit in kits {
            let id = kit.id.trim();
            if id.is_empty() {
                continue;
            }
            if out.iter().any(|k| k.id.eq_ignore_ascii_case(id)) {
                tracing::warn!("Duplicate kit id '{}' ignored", id);
                continue;
            }
            out.push(KitDefinition {
                id: id.to_string(),
                coords: kit.coords,
            });
        }
        Self { kits: out }
    }

    /// 从配置段构建；配置为空时回退到内置目录
    pub fn from_config(kits: &BTreeMap<String, Coordinate>) -> Self {
        if kits.is_empty() {
            return Self::builtin();
        }
        Self::new(kits.iter().map(|(id, coords)| KitDefinition {
            id: id.clone(),
            coords: *coords,
        }))
    }

    /// 内置 kit 目录（出生点附近的按钮墙）
    pub fn builtin() -> Self {
        const BUILTIN: [(&str, f64, f64, f64); 9] = [
            ("Gapples", -603985.0, 306.0, -462611.0),
            ("pvp", -603983.0, 306.0, -462613.0),
            ("cpvp", -603983.0, 306.0, -462613.0),
            ("totem", -603982.0, 306.0, -462611.0),
            ("redstone", -603980.0, 306.0, -462613.0),
            ("SlokoSloppy", -603979.0, 306.0, -462611.0),
            ("Shulker", -603977.0, 306.0, -462613.0),
            ("Crystal", -603976.0, 306.0, -462611.0),
            ("Dye", -603974.0, 306.0, -462613.0),
        ];
        Self::new(BUILTIN.iter().map(|&(id, x, y, z)| KitDefinition {
            id: id.to_string(),
            coords: Coordinate::new(x, y, z),
        }))
    }

    /// 按标识查找（忽略大小写与首尾空白）
    pub fn get(&self, id: &str) -> Option<&KitDefinition> {
        let id = id.trim();
        self.kits.iter().find(|k| k.id.eq_ignore_ascii_case(id))
    }

    /// 所有合法标识（按目录顺序）
    pub fn ids(&self) -> Vec<String> {
        self.kits.iter().map(|k| k.id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.kits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kits.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_is_case_insensitive() {
        let catalog = KitCatalog::builtin();
        assert_eq!(catalog.get("gapples").unwrap().id, "Gapples");
        assert_eq!(catalog.get("  PVP ").unwrap().id, "pvp");
        assert!(catalog.get("doesnotexist").is_none());
    }

    #[test]
    fn test_builtin_order_and_coords() {
        let catalog = KitCatalog::builtin();
        assert_eq!(catalog.len(), 9);
        assert_eq!(catalog.ids()[0], "Gapples");
        assert_eq!(
            catalog.get("totem").unwrap().coords,
            Coordinate::new(-603982.0, 306.0, -462611.0)
        );
    }

    #[test]
    fn test_duplicate_ids_keep_first() {
        let catalog = KitCatalog::new(vec![
            KitDefinition {
                id: "pvp".into(),
                coords: Coordinate::new(1.0, 2.0, 3.0),
            },
            KitDefinition {
                id: "PVP".into(),
                coords: Coordinate::new(9.0, 9.0, 9.0),
            },
        ]);
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.get("pvp").unwrap().coords.x, 1.0);
    }

    #[test]
    fn test_empty_config_falls_back_to_builtin() {
        let catalog = KitCatalog::from_config(&BTreeMap::new());
        assert_eq!(catalog.len(), KitCatalog::builtin().len());

        let mut map = BTreeMap::new();
        map.insert("dye".to_string(), Coordinate::new(0.0, 64.0, 0.0));
        let catalog = KitCatalog::from_config(&map);
        assert_eq!(catalog.ids(), vec!["dye".to_string()]);
    }

    #[test]
    fn test_coordinate_display() {
        let c = Coordinate::new(1.0, 2.5, -3.126);
        assert_eq!(c.to_string(), "X=1.00, Y=2.50, Z=-3.13");
    }
}
