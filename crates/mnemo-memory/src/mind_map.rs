//! 思维导图
//!
//! 长期记忆目录树的只读视图，只有文件夹名和文件名，不含内容。
//! 每次按需从磁盘生成，从不缓存。

use std::path::Path;
use walkdir::WalkDir;

pub const ARCHIVE_DIR: &str = "archive";

/// 不属于记忆文档的文件：隐藏文件和索引文件
pub fn is_reserved_name(name: &str) -> bool {
    name.starts_with('.') || name.starts_with("_index")
}

/// 相对路径中任一段是保留名时，该文件不会出现在列表和导图中
pub fn is_reserved_path(rel: &str) -> bool {
    rel.split('/').any(is_reserved_name)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MindMapNode {
    Folder { name: String, children: Vec<MindMapNode> },
    File { name: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MindMap {
    pub children: Vec<MindMapNode>,
}

impl MindMap {
    /// 遍历根目录生成导图，根目录不存在时为空
    ///
    /// 每个文件夹一个节点，包括空文件夹和 `archive/`；跳过隐藏和索引文件。
    pub fn generate(root: &Path) -> Self {
        let mut open: Vec<OpenFolder> = Vec::new();
        let mut top = Vec::new();

        let entries = WalkDir::new(root)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_reserved_name(&e.file_name().to_string_lossy()))
            .filter_map(|e| e.ok());

        for entry in entries {
            let depth = entry.depth();
            close_folders(&mut open, &mut top, depth);

            let name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type().is_dir() {
                open.push(OpenFolder {
                    depth,
                    name,
                    children: Vec::new(),
                });
            } else if entry.file_type().is_file() {
                let node = MindMapNode::File { name };
                match open.last_mut() {
                    Some(parent) => parent.children.push(node),
                    None => top.push(node),
                }
            }
        }
        close_folders(&mut open, &mut top, 0);

        Self { children: top }
    }

    /// 所有文件的相对路径，按导图顺序
    pub fn files(&self) -> Vec<String> {
        let mut out = Vec::new();
        collect_files(&self.children, "", &mut out);
        out
    }

    /// 可被召回的文件，归档目录除外
    pub fn recall_candidates(&self) -> Vec<String> {
        let prefix = format!("{}/", ARCHIVE_DIR);
        self.files()
            .into_iter()
            .filter(|path| !path.starts_with(&prefix))
            .collect()
    }

    pub fn has_files(&self) -> bool {
        fn any_file(nodes: &[MindMapNode]) -> bool {
            nodes.iter().any(|node| match node {
                MindMapNode::File { .. } => true,
                MindMapNode::Folder { children, .. } => any_file(children),
            })
        }
        any_file(&self.children)
    }

    pub fn to_xml(&self) -> String {
        if self.children.is_empty() {
            return "<long-term-memory empty=\"true\" />".to_string();
        }
        let mut out = String::from("<long-term-memory>\n");
        render(&self.children, 1, &mut out);
        out.push_str("</long-term-memory>");
        out
    }
}

struct OpenFolder {
    depth: usize,
    name: String,
    children: Vec<MindMapNode>,
}

/// 关闭深度不小于 `depth` 的文件夹并挂到上一层
fn close_folders(open: &mut Vec<OpenFolder>, top: &mut Vec<MindMapNode>, depth: usize) {
    while open.last().is_some_and(|folder| folder.depth >= depth) {
        let Some(folder) = open.pop() else {
            break;
        };
        let node = MindMapNode::Folder {
            name: folder.name,
            children: folder.children,
        };
        match open.last_mut() {
            Some(parent) => parent.children.push(node),
            None => top.push(node),
        }
    }
}

fn collect_files(nodes: &[MindMapNode], prefix: &str, out: &mut Vec<String>) {
    for node in nodes {
        match node {
            MindMapNode::File { name } => out.push(format!("{}{}", prefix, name)),
            MindMapNode::Folder { name, children } => {
                collect_files(children, &format!("{}{}/", prefix, name), out)
            }
        }
    }
}

fn render(nodes: &[MindMapNode], depth: usize, out: &mut String) {
    let indent = "  ".repeat(depth);
    for node in nodes {
        match node {
            MindMapNode::File { name } => {
                out.push_str(&format!("{}<file name=\"{}\" />\n", indent, escape(name)));
            }
            MindMapNode::Folder { name, children } if children.is_empty() => {
                out.push_str(&format!("{}<folder name=\"{}\" />\n", indent, escape(name)));
            }
            MindMapNode::Folder { name, children } => {
                out.push_str(&format!("{}<folder name=\"{}\">\n", indent, escape(name)));
                render(children, depth + 1, out);
                out.push_str(&format!("{}</folder>\n", indent));
            }
        }
    }
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "x").unwrap();
    }

    #[test]
    fn test_missing_root_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let map = MindMap::generate(&dir.path().join("nope"));
        assert!(!map.has_files());
        assert_eq!(map.to_xml(), "<long-term-memory empty=\"true\" />");
    }

    #[test]
    fn test_tree_matches_disk() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "b.md");
        touch(dir.path(), "projects/mnemo/design.md");
        touch(dir.path(), "projects/alpha.md");
        touch(dir.path(), "_index_relations.json");
        touch(dir.path(), "projects/.a.md.tmp-1");
        touch(dir.path(), "archive/old.md");
        fs::create_dir_all(dir.path().join("drafts")).unwrap();

        let map = MindMap::generate(dir.path());
        assert_eq!(
            map.files(),
            vec!["archive/old.md", "b.md", "projects/alpha.md", "projects/mnemo/design.md"]
        );
        assert_eq!(
            map.recall_candidates(),
            vec!["b.md", "projects/alpha.md", "projects/mnemo/design.md"]
        );

        let xml = map.to_xml();
        assert_eq!(
            xml,
            "<long-term-memory>\n\
             \x20 <folder name=\"archive\">\n\
             \x20   <file name=\"old.md\" />\n\
             \x20 </folder>\n\
             \x20 <file name=\"b.md\" />\n\
             \x20 <folder name=\"drafts\" />\n\
             \x20 <folder name=\"projects\">\n\
             \x20   <file name=\"alpha.md\" />\n\
             \x20   <folder name=\"mnemo\">\n\
             \x20     <file name=\"design.md\" />\n\
             \x20   </folder>\n\
             \x20 </folder>\n\
             </long-term-memory>"
        );
    }

    #[test]
    fn test_only_empty_folders() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("inbox")).unwrap();

        let map = MindMap::generate(dir.path());
        assert!(!map.has_files());
        assert_eq!(
            map.to_xml(),
            "<long-term-memory>\n  <folder name=\"inbox\" />\n</long-term-memory>"
        );
    }

    #[test]
    fn test_reserved_path() {
        assert!(is_reserved_path("_index_notes/editor.md"));
        assert!(is_reserved_path("notes/.hidden/x.md"));
        assert!(!is_reserved_path("notes/index.md"));
    }

    #[test]
    fn test_escape_names() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "a&b.md");
        assert!(MindMap::generate(dir.path()).to_xml().contains("a&amp;b.md"));
    }
}
