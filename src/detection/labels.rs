// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 类别名称与类别层级
//!
//! 层级文件每行 `<名称> <父类索引>`, 根类别父索引为 -1 (darknet tree 格式)。

use std::fs;
use std::path::Path;

use crate::error::{PipelineError, Result};

/// 读取类别名称文件 (每行一个, 忽略空行)
pub fn load_names(path: impl AsRef<Path>) -> Result<Vec<String>> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(|e| {
        PipelineError::Config(format!("无法读取类别文件 {}: {}", path.display(), e))
    })?;
    Ok(parse_names(&text))
}

pub fn parse_names(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

/// 类别层级: 子类只有在所有祖先都超过层级阈值时才保留
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassHierarchy {
    parents: Vec<Option<usize>>,
}

impl ClassHierarchy {
    /// 没有层级 (所有类别都是根)
    pub fn flat(classes: usize) -> Self {
        Self {
            parents: vec![None; classes],
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("无法读取层级文件 {}: {}", path.display(), e))
        })?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut parents = Vec::new();
        for (line_no, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let parent = line
                .rsplit_once(char::is_whitespace)
                .map(|(_, p)| p)
                .ok_or_else(|| {
                    PipelineError::Config(format!("层级文件第{}行缺少父类索引", line_no + 1))
                })?;
            let parent: i64 = parent.parse().map_err(|_| {
                PipelineError::Config(format!("层级文件第{}行父类索引无效: {}", line_no + 1, parent))
            })?;
            parents.push(if parent < 0 {
                None
            } else {
                Some(parent as usize)
            });
        }

        for (id, parent) in parents.iter().enumerate() {
            if let Some(p) = parent {
                if *p >= id {
                    return Err(PipelineError::Config(format!(
                        "类别 {} 的父类 {} 必须排在它之前",
                        id, p
                    )));
                }
            }
        }
        Ok(Self { parents })
    }

    pub fn len(&self) -> usize {
        self.parents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parents.is_empty()
    }

    pub fn parent(&self, class_id: usize) -> Option<usize> {
        self.parents.get(class_id).copied().flatten()
    }

    /// 判断类别在层级阈值下是否成立: 所有祖先的得分都要 > hier
    pub fn passes(&self, class_id: usize, scores: &[f32], hier: f32) -> bool {
        let mut current = self.parent(class_id);
        while let Some(ancestor) = current {
            match scores.get(ancestor) {
                Some(s) if *s > hier => {}
                _ => return false,
            }
            current = self.parent(ancestor);
        }
        true
    }
}
