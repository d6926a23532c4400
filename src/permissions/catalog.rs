//! Closed set of permission keys and the built-in role defaults.
//!
//! Built-in roles carry an explicit allow/deny for every catalog key at the
//! global context. Custom roles (anything not listed in [`UserRole`]) only get
//! what is stored for them.

use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use super::error::PermissionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct PermissionDef {
    pub key: &'static str,
    pub name: &'static str,
    pub description: &'static str,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct PermissionCategory {
    pub id: &'static str,
    pub name: &'static str,
    pub permissions: &'static [PermissionDef],
}

const fn def(key: &'static str, name: &'static str, description: &'static str) -> PermissionDef {
    PermissionDef { key, name, description }
}

pub static CATEGORIES: &[PermissionCategory] = &[
    PermissionCategory {
        id: "system",
        name: "System Management",
        permissions: &[
            def("canManageSystem", "Manage system", "Platform-wide configuration"),
            def("canManageInstitutions", "Manage institutions", "Create and configure institutions"),
            def("canManageGlobalUsers", "Manage global users", "Manage users across every institution"),
            def("canViewSystemAnalytics", "System analytics", "View platform-wide analytics"),
            def("canManageSecurityPolicies", "Security policies", "Manage security policies"),
            def("canViewPortalReports", "Portal reports", "View portal reports"),
        ],
    },
    PermissionCategory {
        id: "institution",
        name: "Institution Management",
        permissions: &[
            def("canManageSchools", "Manage schools", "Create and configure schools"),
            def("canManageInstitutionUsers", "Manage institution users", "Manage users, groups and grants of an institution"),
            def("canManageClasses", "Manage classes", "Create and configure classes"),
            def("canManageSchedules", "Manage schedules", "Maintain class schedules"),
            def("canViewInstitutionAnalytics", "Institution analytics", "View institution analytics"),
        ],
    },
    PermissionCategory {
        id: "academic",
        name: "Academic Management",
        permissions: &[
            def("canManageCycles", "Manage cycles", "Maintain educational cycles"),
            def("canManageCurriculum", "Manage curriculum", "Maintain curriculum"),
            def("canMonitorTeachers", "Monitor teachers", "Follow teacher activity"),
            def("canViewAcademicAnalytics", "Academic analytics", "View academic analytics"),
            def("canCoordinateDepartments", "Coordinate departments", "Coordinate departments"),
        ],
    },
    PermissionCategory {
        id: "teaching",
        name: "Teaching",
        permissions: &[
            def("canManageAttendance", "Manage attendance", "Record attendance"),
            def("canManageGrades", "Manage grades", "Record grades"),
            def("canManageLessonPlans", "Manage lesson plans", "Maintain lesson plans"),
            def("canUploadResources", "Upload resources", "Upload teaching resources"),
            def("canCommunicateWithStudents", "Message students", "Communicate with students"),
            def("canCommunicateWithGuardians", "Message guardians", "Communicate with guardians"),
        ],
    },
    PermissionCategory {
        id: "student",
        name: "Student Access",
        permissions: &[
            def("canViewOwnSchedule", "Own schedule", "View own schedule"),
            def("canViewOwnGrades", "Own grades", "View own grades"),
            def("canAccessLearningMaterials", "Learning materials", "Access learning materials"),
            def("canSubmitAssignments", "Submit assignments", "Submit assignments"),
            def("canTrackOwnProgress", "Own progress", "Track own progress"),
            def("canMessageTeachers", "Message teachers", "Send messages to teachers"),
        ],
    },
    PermissionCategory {
        id: "guardian",
        name: "Guardian Access",
        permissions: &[
            def("canViewChildrenInfo", "Children info", "View children information"),
            def("canViewChildrenGrades", "Children grades", "View children grades"),
            def("canViewChildrenAttendance", "Children attendance", "View children attendance"),
            def("canViewChildrenAssignments", "Children assignments", "View children assignments"),
            def("canReceiveAnnouncements", "Announcements", "Receive announcements"),
            def("canCommunicateWithSchool", "Message school", "Communicate with the school"),
            def("canScheduleMeetings", "Schedule meetings", "Schedule meetings"),
        ],
    },
    PermissionCategory {
        id: "financial",
        name: "Financial Access",
        permissions: &[
            def("canViewFinancialInfo", "Financial info", "View financial information"),
            def("canViewPayments", "Payments", "View payments"),
            def("canViewBoletos", "Bank slips", "View bank slips"),
            def("canViewFinancialHistory", "Financial history", "View financial history"),
        ],
    },
];

/// The catalog as served to clients.
pub fn catalog_json() -> Result<serde_json::Value, serde_json::Error> {
    serde_json::to_value(CATEGORIES)
}

/// Every catalog key, in category order.
pub fn all_keys() -> impl Iterator<Item = &'static str> {
    CATEGORIES
        .iter()
        .flat_map(|c| c.permissions.iter())
        .map(|p| p.key)
}

pub fn is_known(key: &str) -> bool {
    all_keys().any(|k| k == key)
}

pub fn ensure_known(key: &str) -> Result<&'static str, PermissionError> {
    all_keys()
        .find(|k| *k == key)
        .ok_or_else(|| PermissionError::UnknownPermission(key.to_string()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserRole {
    SystemAdmin,
    InstitutionManager,
    Coordinator,
    Teacher,
    Student,
    Guardian,
}

impl UserRole {
    pub const ALL: [UserRole; 6] = [
        UserRole::SystemAdmin,
        UserRole::InstitutionManager,
        UserRole::Coordinator,
        UserRole::Teacher,
        UserRole::Student,
        UserRole::Guardian,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::SystemAdmin => "SYSTEM_ADMIN",
            UserRole::InstitutionManager => "INSTITUTION_MANAGER",
            UserRole::Coordinator => "COORDINATOR",
            UserRole::Teacher => "TEACHER",
            UserRole::Student => "STUDENT",
            UserRole::Guardian => "GUARDIAN",
        }
    }

    /// Keys this role allows by default. Every other catalog key is denied.
    pub fn default_allowed(&self) -> &'static [&'static str] {
        match self {
            // Everything; handled in `default_for`.
            UserRole::SystemAdmin => &[],
            UserRole::InstitutionManager => &[
                "canViewPortalReports",
                "canManageSchools",
                "canManageInstitutionUsers",
                "canManageClasses",
                "canManageSchedules",
                "canViewInstitutionAnalytics",
                "canManageCycles",
                "canManageCurriculum",
                "canMonitorTeachers",
                "canViewAcademicAnalytics",
                "canCoordinateDepartments",
                "canCommunicateWithStudents",
                "canCommunicateWithGuardians",
                "canReceiveAnnouncements",
            ],
            UserRole::Coordinator => &[
                "canViewPortalReports",
                "canManageClasses",
                "canManageSchedules",
                "canViewInstitutionAnalytics",
                "canManageCycles",
                "canManageCurriculum",
                "canMonitorTeachers",
                "canViewAcademicAnalytics",
                "canCoordinateDepartments",
                "canUploadResources",
                "canCommunicateWithStudents",
                "canCommunicateWithGuardians",
                "canMessageTeachers",
                "canReceiveAnnouncements",
            ],
            UserRole::Teacher => &[
                "canViewPortalReports",
                "canManageAttendance",
                "canManageGrades",
                "canManageLessonPlans",
                "canUploadResources",
                "canCommunicateWithStudents",
                "canCommunicateWithGuardians",
                "canViewOwnSchedule",
                "canAccessLearningMaterials",
                "canMessageTeachers",
                "canReceiveAnnouncements",
                "canCommunicateWithSchool",
            ],
            UserRole::Student => &[
                "canCommunicateWithStudents",
                "canViewOwnSchedule",
                "canViewOwnGrades",
                "canAccessLearningMaterials",
                "canSubmitAssignments",
                "canTrackOwnProgress",
                "canMessageTeachers",
                "canReceiveAnnouncements",
            ],
            UserRole::Guardian => &[
                "canViewChildrenInfo",
                "canViewChildrenGrades",
                "canViewChildrenAttendance",
                "canViewChildrenAssignments",
                "canReceiveAnnouncements",
                "canCommunicateWithSchool",
                "canScheduleMeetings",
                "canViewFinancialInfo",
                "canViewPayments",
                "canViewBoletos",
                "canViewFinancialHistory",
            ],
        }
    }

    /// Built-in default for a key, `None` for keys outside the catalog.
    pub fn default_for(&self, key: &str) -> Option<bool> {
        if !is_known(key) {
            return None;
        }
        Some(match self {
            UserRole::SystemAdmin => true,
            role => role.default_allowed().contains(&key),
        })
    }
}

/// Role names are compared case-insensitively; stored and claimed roles are
/// uppercased before use.
pub fn canonical_role(role: &str) -> String {
    role.trim().to_uppercase()
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserRole {
    type Err = PermissionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        UserRole::ALL
            .iter()
            .copied()
            .find(|r| r.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| PermissionError::UnknownRole(s.to_string()))
    }
}
