//! Selection menu model.
//!
//! The menu is a tree: a client toggle, a removal submenu and one submenu
//! per torrent listing its files. Leaves carry the action to run when chosen.

use std::fmt::Write;

use crate::supervisor::{GatewayState, TrackedTorrent};

/// What choosing a menu item does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MenuAction {
    /// Start the gateway if stopped, stop it if running
    ToggleGateway,
    /// Load a stream URL in the player
    Play { url: String },
    Remove { info_hash: String, delete_files: bool },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuItem {
    pub title: String,
    pub hint: Option<String>,
    pub action: Option<MenuAction>,
    pub children: Vec<MenuItem>,
}

impl MenuItem {
    fn leaf(title: impl Into<String>, hint: Option<String>, action: MenuAction) -> Self {
        Self {
            title: title.into(),
            hint,
            action: Some(action),
            children: Vec::new(),
        }
    }

    fn submenu(title: impl Into<String>, hint: Option<String>, children: Vec<MenuItem>) -> Self {
        Self {
            title: title.into(),
            hint,
            action: None,
            children,
        }
    }
}

/// A rendered menu tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Menu {
    pub items: Vec<MenuItem>,
}

impl Menu {
    /// Builds the menu for the current gateway state and torrents.
    ///
    /// Torrents appear in the given order.
    pub fn build<'a>(state: GatewayState, torrents: impl IntoIterator<Item = &'a TrackedTorrent>) -> Self {
        let torrents: Vec<&TrackedTorrent> = torrents.into_iter().collect();
        let toggle_title = match state {
            GatewayState::Running => "Torrent client: running (stop)",
            GatewayState::Starting => "Torrent client: starting",
            GatewayState::Stopped => "Torrent client: stopped (start)",
        };
        let mut items = vec![MenuItem::leaf(toggle_title, None, MenuAction::ToggleGateway)];

        let removals = torrents
            .iter()
            .map(|torrent| {
                let remove = |title: &str, delete_files| {
                    MenuItem::leaf(
                        title,
                        None,
                        MenuAction::Remove {
                            info_hash: torrent.info_hash.clone(),
                            delete_files,
                        },
                    )
                };
                MenuItem::submenu(
                    torrent.name.clone(),
                    None,
                    vec![remove("Remove", false), remove("Remove and delete files", true)],
                )
            })
            .collect();
        items.push(MenuItem::submenu("Remove torrent", None, removals));

        for torrent in torrents {
            let files = torrent
                .files
                .iter()
                .map(|file| {
                    MenuItem::leaf(
                        file.name.clone(),
                        Some(human_size(file.length)),
                        MenuAction::Play { url: file.url.clone() },
                    )
                })
                .collect();
            items.push(MenuItem::submenu(
                torrent.name.clone(),
                Some(human_size(torrent.length)),
                files,
            ));
        }

        Self { items }
    }

    /// Indented text rendering, two spaces per level.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for item in &self.items {
            render_item(&mut out, item, 0);
        }
        out
    }

    /// Actionable items in depth-first order, labelled with their path.
    pub fn choices(&self) -> Vec<(String, MenuAction)> {
        let mut choices = Vec::new();
        for item in &self.items {
            collect_choices(&mut choices, item, "");
        }
        choices
    }
}

fn render_item(out: &mut String, item: &MenuItem, depth: usize) {
    let _ = write!(out, "{:indent$}{}", "", item.title, indent = depth * 2);
    if let Some(hint) = &item.hint {
        let _ = write!(out, " [{hint}]");
    }
    out.push('\n');
    for child in &item.children {
        render_item(out, child, depth + 1);
    }
}

fn collect_choices(choices: &mut Vec<(String, MenuAction)>, item: &MenuItem, prefix: &str) {
    let label = if prefix.is_empty() {
        item.title.clone()
    } else {
        format!("{prefix} > {}", item.title)
    };
    if let Some(action) = &item.action {
        choices.push((label.clone(), action.clone()));
    }
    for child in &item.children {
        collect_choices(choices, child, &label);
    }
}

/// Formats a byte count with binary units, e.g. `1.5 GiB`.
pub fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["KiB", "MiB", "GiB", "TiB", "PiB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

#[cfg(test)]
mod tests {
    use undertow_core::FileEntry;

    use super::*;

    fn torrent(hash: &str, name: &str, files: &[(&str, u64)]) -> TrackedTorrent {
        TrackedTorrent {
            info_hash: hash.to_string(),
            name: name.to_string(),
            length: files.iter().map(|(_, len)| len).sum(),
            files: files
                .iter()
                .map(|(file, length)| FileEntry {
                    name: file.to_string(),
                    url: format!("http://h/{hash}/{file}"),
                    length: *length,
                    mime_type: "video/mp4".to_string(),
                    depth: 1,
                })
                .collect(),
        }
    }

    #[test]
    fn test_human_size() {
        assert_eq!(human_size(0), "0 B");
        assert_eq!(human_size(1023), "1023 B");
        assert_eq!(human_size(1536), "1.5 KiB");
        assert_eq!(human_size(5 * 1024 * 1024), "5.0 MiB");
        assert_eq!(human_size(3 * 1024 * 1024 * 1024 / 2), "1.5 GiB");
    }

    #[test]
    fn test_menu_structure() {
        let torrents = [torrent("aa", "Show", &[("a.mp4", 2048), ("b.mp4", 1024)])];
        let menu = Menu::build(GatewayState::Running, &torrents);

        assert_eq!(menu.items.len(), 3);
        assert_eq!(menu.items[0].action, Some(MenuAction::ToggleGateway));
        assert_eq!(menu.items[1].title, "Remove torrent");
        assert_eq!(menu.items[1].children[0].children.len(), 2);
        assert_eq!(menu.items[2].title, "Show");
        assert_eq!(menu.items[2].hint.as_deref(), Some("3.0 KiB"));
        assert_eq!(
            menu.items[2].children[1].action,
            Some(MenuAction::Play {
                url: "http://h/aa/b.mp4".to_string()
            })
        );
    }

    #[test]
    fn test_choices_are_depth_first() {
        let torrents = [torrent("aa", "Show", &[("a.mp4", 10)])];
        let choices = Menu::build(GatewayState::Stopped, &torrents).choices();
        let labels: Vec<&str> = choices.iter().map(|(label, _)| label.as_str()).collect();
        assert_eq!(
            labels,
            vec![
                "Torrent client: stopped (start)",
                "Remove torrent > Show > Remove",
                "Remove torrent > Show > Remove and delete files",
                "Show > a.mp4",
            ]
        );
        assert_eq!(
            choices[2].1,
            MenuAction::Remove {
                info_hash: "aa".to_string(),
                delete_files: true
            }
        );
    }

    #[test]
    fn test_render_indents_levels() {
        let torrents = [torrent("aa", "Show", &[("a.mp4", 10)])];
        let text = Menu::build(GatewayState::Running, &torrents).render();
        assert!(text.contains("\nRemove torrent\n  Show\n    Remove\n"));
        assert!(text.ends_with("Show [10 B]\n  a.mp4 [10 B]\n"));
    }
}
