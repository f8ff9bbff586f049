use tracing::{info, warn};

use crate::connectors::{FolderRef, FolderRole, MailConnector};

pub const INBOX: &str = "inbox";
pub const ARCHIVE: &str = "archive";

/// Folders never synced as "other" folders. Inbox and archive are handled
/// on their own; the rest hold outgoing, discarded or junk mail.
const SKIPPED_FOLDER_NAMES: &[&str] = &[
    INBOX,
    ARCHIVE,
    "sent",
    "sent items",
    "sent mail",
    "deleted",
    "deleted items",
    "trash",
    "drafts",
    "junk",
    "junk email",
    "junk e-mail",
    "spam",
    "outbox",
];

#[derive(Debug, Clone, Default)]
pub struct FolderSelection {
    pub include_other_folders: bool,
    pub include_archive: bool,
    /// When non-empty, only these names are taken from the other folders.
    pub explicit_names: Vec<String>,
}

/// Inbox and archive as the connector can address them blind.
#[derive(Debug, Clone, Default)]
pub struct WellKnownFolders {
    pub inbox: Option<FolderRef>,
    pub archive: Option<FolderRef>,
}

impl WellKnownFolders {
    pub fn of(connector: &dyn MailConnector) -> Self {
        Self {
            inbox: connector.well_known_folder(FolderRole::Inbox),
            archive: connector.well_known_folder(FolderRole::Archive),
        }
    }
}

/// Sync order: inbox, then archive when enabled, then the remaining folders
/// in listing order.
///
/// The inbox is always planned: a role-tagged listing entry wins, then a
/// name match, then the connector's well-known address. The well-known
/// archive is only used when the listing came back empty.
pub fn plan_folders(
    listing: &[FolderRef],
    well_known: &WellKnownFolders,
    selection: &FolderSelection,
) -> Vec<FolderRef> {
    let inbox = find_role(listing, FolderRole::Inbox, INBOX).or_else(|| {
        if well_known.inbox.is_none() {
            warn!("backend listing has no inbox folder");
        } else if !listing.is_empty() {
            warn!("backend listing has no inbox folder, using well-known address");
        }
        well_known.inbox.clone()
    });

    let archive = if selection.include_archive {
        let found = find_role(listing, FolderRole::Archive, ARCHIVE);
        match found {
            Some(folder) => Some(folder),
            None if listing.is_empty() => well_known.archive.clone(),
            None => {
                info!("no archive folder in this mailbox, skipping");
                None
            }
        }
    } else {
        None
    };

    if selection.include_other_folders {
        for name in &selection.explicit_names {
            if !listing.iter().any(|folder| matches_name(folder, name)) {
                warn!(folder = %name, "requested folder not found");
            }
        }
    }

    let claimed: Vec<&str> = inbox
        .iter()
        .chain(archive.iter())
        .map(|folder| folder.backend_ref.as_str())
        .collect();

    let others = listing
        .iter()
        .filter(|_| selection.include_other_folders)
        .filter(|folder| folder.role.is_none() && !is_skipped(folder))
        .filter(|folder| !claimed.contains(&folder.backend_ref.as_str()))
        .filter(|folder| {
            selection.explicit_names.is_empty()
                || selection
                    .explicit_names
                    .iter()
                    .any(|name| matches_name(folder, name))
        })
        .cloned()
        .collect::<Vec<_>>();

    inbox.into_iter().chain(archive).chain(others).collect()
}

fn find_role(listing: &[FolderRef], role: FolderRole, name: &str) -> Option<FolderRef> {
    listing
        .iter()
        .find(|folder| folder.role == Some(role))
        .or_else(|| find_named(listing, name))
        .cloned()
}

fn find_named<'a>(listing: &'a [FolderRef], name: &str) -> Option<&'a FolderRef> {
    listing
        .iter()
        .find(|folder| folder.name.trim().eq_ignore_ascii_case(name))
}

fn is_skipped(folder: &FolderRef) -> bool {
    let lower = folder.name.trim().to_lowercase();
    SKIPPED_FOLDER_NAMES.iter().any(|&skipped| lower == skipped)
}

/// A requested name matches the full path or its last segment.
fn matches_name(folder: &FolderRef, requested: &str) -> bool {
    let requested = requested.trim();
    let name = folder.name.trim();
    name.eq_ignore_ascii_case(requested)
        || name
            .rsplit('/')
            .next()
            .is_some_and(|leaf| leaf.eq_ignore_ascii_case(requested))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listing() -> Vec<FolderRef> {
        [
            "Projects",
            "Sent Items",
            "Inbox",
            "Drafts",
            "Archive",
            "Deleted Items",
            "Junk Email",
            "Receipts",
            "Projects/Alpha",
        ]
        .iter()
        .map(|name| FolderRef::new(*name, format!("id-{name}")))
        .collect()
    }

    fn names(folders: Vec<FolderRef>) -> Vec<String> {
        folders.into_iter().map(|folder| folder.name).collect()
    }

    fn well_known() -> WellKnownFolders {
        WellKnownFolders {
            inbox: Some(FolderRef::new("Inbox", "inbox").with_role(FolderRole::Inbox)),
            archive: Some(FolderRef::new("Archive", "archive").with_role(FolderRole::Archive)),
        }
    }

    #[test]
    fn inbox_then_archive_then_others() {
        let listing = listing();
        let selection = FolderSelection {
            include_other_folders: true,
            include_archive: true,
            explicit_names: Vec::new(),
        };

        assert_eq!(
            names(plan_folders(&listing, &well_known(), &selection)),
            vec!["Inbox", "Archive", "Projects", "Receipts", "Projects/Alpha"]
        );
    }

    #[test]
    fn archive_and_others_can_be_disabled() {
        let listing = listing();
        let selection = FolderSelection::default();
        assert_eq!(names(plan_folders(&listing, &well_known(), &selection)), vec!["Inbox"]);
    }

    #[test]
    fn missing_archive_is_skipped_silently() {
        let listing = vec![FolderRef::new("Inbox", "i"), FolderRef::new("Notes", "n")];
        let selection = FolderSelection {
            include_other_folders: true,
            include_archive: true,
            explicit_names: Vec::new(),
        };
        assert_eq!(names(plan_folders(&listing, &well_known(), &selection)), vec!["Inbox", "Notes"]);
    }

    #[test]
    fn explicit_names_filter_others_by_leaf_or_path() {
        let listing = listing();
        let selection = FolderSelection {
            include_other_folders: true,
            include_archive: false,
            explicit_names: vec!["alpha".to_string(), "Receipts".to_string(), "Nope".to_string()],
        };
        assert_eq!(
            names(plan_folders(&listing, &well_known(), &selection)),
            vec!["Inbox", "Receipts", "Projects/Alpha"]
        );
    }

    #[test]
    fn system_folders_are_excluded_case_insensitively() {
        let listing = vec![
            FolderRef::new("INBOX", "i"),
            FolderRef::new("sent items", "s"),
            FolderRef::new("JUNK EMAIL", "j"),
            FolderRef::new("Trash", "t"),
        ];
        let selection = FolderSelection {
            include_other_folders: true,
            include_archive: true,
            explicit_names: Vec::new(),
        };
        assert_eq!(names(plan_folders(&listing, &well_known(), &selection)), vec!["INBOX"]);
    }

    #[test]
    fn empty_listing_falls_back_to_well_known_folders() {
        let selection = FolderSelection {
            include_other_folders: true,
            include_archive: true,
            explicit_names: Vec::new(),
        };
        let planned = plan_folders(&[], &well_known(), &selection);
        let refs: Vec<&str> = planned.iter().map(|f| f.backend_ref.as_str()).collect();
        assert_eq!(refs, vec!["inbox", "archive"]);
    }

    #[test]
    fn localized_inbox_is_found_by_role() {
        let listing = vec![
            FolderRef::new("Projekte", "p"),
            FolderRef::new("Posteingang", "x1").with_role(FolderRole::Inbox),
            FolderRef::new("Archiv", "x2").with_role(FolderRole::Archive),
        ];
        let selection = FolderSelection {
            include_other_folders: true,
            include_archive: true,
            explicit_names: Vec::new(),
        };
        assert_eq!(
            names(plan_folders(&listing, &well_known(), &selection)),
            vec!["Posteingang", "Archiv", "Projekte"]
        );
    }

    #[test]
    fn listing_without_inbox_still_plans_one() {
        let listing = vec![FolderRef::new("Notes", "n")];
        let planned = plan_folders(&listing, &well_known(), &FolderSelection::default());
        assert_eq!(planned.len(), 1);
        assert_eq!(planned[0].backend_ref, "inbox");
    }
}
