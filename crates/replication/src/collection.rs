//! Replicated collections and their ownership table.

use serde::{Deserialize, Serialize};

/// Every collection that participates in replication or seeding.
///
/// The wire names match the original document-store collection keys, so an
/// envelope serialized by a hub is readable by any satellite of the same
/// major.minor build.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Collection {
    Activities,
    Announcements,
    Assignments,
    BookAssignments,
    Books,
    ChatGroups,
    Chats,
    Classrooms,
    Contents,
    Contributions,
    Districts,
    Homeworks,
    Jobs,
    Levels,
    Publishers,
    Questions,
    SchoolCourses,
    Schools,
    Subjects,
    Tags,
    Tenants,
    Typographies,
    Users,
}

/// Which side of the topology owns a collection's data.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CollectionOwner {
    /// Global catalog data: the hub is authoritative. A hub never accepts
    /// inbound writes for these; satellites mirror them.
    Hub,
    /// Operational data: writable on both sides, hub wins on conflict.
    Shared,
}

impl Collection {
    /// All collections, in stable (wire-name) order.
    pub const ALL: [Collection; 23] = [
        Collection::Activities,
        Collection::Announcements,
        Collection::Assignments,
        Collection::BookAssignments,
        Collection::Books,
        Collection::ChatGroups,
        Collection::Chats,
        Collection::Classrooms,
        Collection::Contents,
        Collection::Contributions,
        Collection::Districts,
        Collection::Homeworks,
        Collection::Jobs,
        Collection::Levels,
        Collection::Publishers,
        Collection::Questions,
        Collection::SchoolCourses,
        Collection::Schools,
        Collection::Subjects,
        Collection::Tags,
        Collection::Tenants,
        Collection::Typographies,
        Collection::Users,
    ];

    /// The ownership table. Kept as one reviewable mapping rather than
    /// conditionals scattered through the sync path.
    pub fn owner(self) -> CollectionOwner {
        match self {
            Collection::BookAssignments
            | Collection::Books
            | Collection::Contributions
            | Collection::Districts
            | Collection::Levels
            | Collection::Publishers
            | Collection::Schools
            | Collection::Subjects
            | Collection::Tags
            | Collection::Tenants
            | Collection::Typographies => CollectionOwner::Hub,

            Collection::Activities
            | Collection::Announcements
            | Collection::Assignments
            | Collection::ChatGroups
            | Collection::Chats
            | Collection::Classrooms
            | Collection::Contents
            | Collection::Homeworks
            | Collection::Jobs
            | Collection::Questions
            | Collection::SchoolCourses
            | Collection::Users => CollectionOwner::Shared,
        }
    }

    pub fn hub_authoritative(self) -> bool {
        self.owner() == CollectionOwner::Hub
    }

    /// Collections carried in a seed payload. Contents travel out-of-band via
    /// content tokens, and queued jobs never cross the wire in a seed.
    pub fn seeded(self) -> bool {
        !matches!(self, Collection::Contents | Collection::Jobs)
    }

    pub fn wire_name(self) -> &'static str {
        match self {
            Collection::Activities => "activities",
            Collection::Announcements => "announcements",
            Collection::Assignments => "assignments",
            Collection::BookAssignments => "bookAssignments",
            Collection::Books => "books",
            Collection::ChatGroups => "chatGroups",
            Collection::Chats => "chats",
            Collection::Classrooms => "classrooms",
            Collection::Contents => "contents",
            Collection::Contributions => "contributions",
            Collection::Districts => "districts",
            Collection::Homeworks => "homeworks",
            Collection::Jobs => "jobs",
            Collection::Levels => "levels",
            Collection::Publishers => "publishers",
            Collection::Questions => "questions",
            Collection::SchoolCourses => "schoolCourses",
            Collection::Schools => "schools",
            Collection::Subjects => "subjects",
            Collection::Tags => "tags",
            Collection::Tenants => "tenants",
            Collection::Typographies => "typographies",
            Collection::Users => "users",
        }
    }
}

impl core::fmt::Display for Collection {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.wire_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names_round_trip_through_serde() {
        for c in Collection::ALL {
            let json = serde_json::to_string(&c).unwrap();
            assert_eq!(json, format!("\"{}\"", c.wire_name()));
            let back: Collection = serde_json::from_str(&json).unwrap();
            assert_eq!(back, c);
        }
    }

    #[test]
    fn catalog_collections_are_hub_owned() {
        assert!(Collection::Books.hub_authoritative());
        assert!(Collection::Tenants.hub_authoritative());
        assert!(!Collection::Chats.hub_authoritative());
        assert!(!Collection::Users.hub_authoritative());
    }

    #[test]
    fn contents_and_jobs_are_never_seeded() {
        assert!(!Collection::Contents.seeded());
        assert!(!Collection::Jobs.seeded());
        assert!(Collection::Books.seeded());
    }
}
