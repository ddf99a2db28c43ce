use chrono::{Datelike, NaiveDate};

/// Snapshot row for a student as the store currently knows it.
/// `id` is None until the record has been persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct StudentRow {
    pub id: Option<String>,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub class_name: String,
    pub roll_no: String,
    pub dob: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TeacherRow {
    pub id: Option<String>,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub subjects: Vec<String>,
    pub experience: i64,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubjectRow {
    pub id: Option<String>,
    pub code: String,
    pub subject_name: String,
    pub active: bool,
}

/// First violated rule from a validation or lifecycle check.
///
/// Variants map one-to-one onto stable wire codes so the UI can show a
/// specific message for each failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    MissingName,
    MissingEmail,
    InvalidEmailFormat,
    DuplicateEmail,
    InvalidPhoneFormat,
    DuplicatePhone,
    MissingClass,
    MissingRollNo,
    DuplicateRollNo,
    MissingDob,
    InvalidDobFormat,
    FutureDob,
    TooYoung,
    MissingSubjects,
    MissingCode,
    DuplicateCode,
    DuplicateName,
    InvalidClassFormat,
    MissingIdentity,
}

impl EngineError {
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::MissingName => "missing_name",
            EngineError::MissingEmail => "missing_email",
            EngineError::InvalidEmailFormat => "invalid_email_format",
            EngineError::DuplicateEmail => "duplicate_email",
            EngineError::InvalidPhoneFormat => "invalid_phone_format",
            EngineError::DuplicatePhone => "duplicate_phone",
            EngineError::MissingClass => "missing_class",
            EngineError::MissingRollNo => "missing_roll_no",
            EngineError::DuplicateRollNo => "duplicate_roll_no",
            EngineError::MissingDob => "missing_dob",
            EngineError::InvalidDobFormat => "invalid_dob_format",
            EngineError::FutureDob => "future_dob",
            EngineError::TooYoung => "too_young",
            EngineError::MissingSubjects => "missing_subjects",
            EngineError::MissingCode => "missing_code",
            EngineError::DuplicateCode => "duplicate_code",
            EngineError::DuplicateName => "duplicate_name",
            EngineError::InvalidClassFormat => "invalid_class_format",
            EngineError::MissingIdentity => "missing_identity",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            EngineError::MissingName => "please enter a name",
            EngineError::MissingEmail => "please enter an email address",
            EngineError::InvalidEmailFormat => "please enter a valid email address",
            EngineError::DuplicateEmail => "email is already registered",
            EngineError::InvalidPhoneFormat => "please enter a valid 10-digit phone number",
            EngineError::DuplicatePhone => "phone number is already registered",
            EngineError::MissingClass => "please select a class",
            EngineError::MissingRollNo => "roll number is required",
            EngineError::DuplicateRollNo => "roll number is already in use",
            EngineError::MissingDob => "please select a date of birth",
            EngineError::InvalidDobFormat => "date of birth must be YYYY-MM-DD",
            EngineError::FutureDob => "date of birth cannot be in the future",
            EngineError::TooYoung => "student should be at least 4 years old",
            EngineError::MissingSubjects => "please select at least one subject",
            EngineError::MissingCode => "please enter a subject code",
            EngineError::DuplicateCode => "subject code already exists",
            EngineError::DuplicateName => "subject name already exists",
            EngineError::InvalidClassFormat => "invalid class format",
            EngineError::MissingIdentity => "record has not been saved yet",
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code(), self.message())
    }
}

impl std::error::Error for EngineError {}

/// Extracts the class number from a label of the form `"Class <N>"`.
/// Matches anywhere in the label, like the console's `Class\s(\d+)` lookup.
pub fn class_number(label: &str) -> Option<&str> {
    let mut from = 0;
    while let Some(pos) = label[from..].find("Class") {
        let after = from + pos + "Class".len();
        let rest = &label[after..];
        if let Some(ws) = rest.chars().next().filter(|c| c.is_whitespace()) {
            let digits = &rest[ws.len_utf8()..];
            let end = digits
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(digits.len());
            if end > 0 {
                return Some(&digits[..end]);
            }
        }
        from = after;
    }
    None
}

/// Next roll number for a class: `{classNumber}A{seq}` where seq is the
/// current class population plus one, zero-padded to two digits.
///
/// Advisory only. Nothing is reserved, so two callers working from stale
/// snapshots can compute the same value; the uniqueness check in
/// `validate_student` (and the store itself) is the backstop at commit.
pub fn next_roll_no(class_name: &str, students: &[StudentRow]) -> Result<String, EngineError> {
    let number = class_number(class_name).ok_or(EngineError::InvalidClassFormat)?;
    let in_class = students
        .iter()
        .filter(|s| s.class_name == class_name)
        .count();
    Ok(format!("{}A{:02}", number, in_class + 1))
}

/// Permissive `local@domain.tld` shape: no whitespace, a single `@`, and
/// an interior dot in the domain part.
pub fn is_valid_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    domain
        .char_indices()
        .any(|(i, c)| c == '.' && i > 0 && i + 1 < domain.len())
}

/// Normalizes a phone number: drop whitespace and hyphens, strip a leading
/// `+91` country prefix, strip one leading `0`. The result must be exactly
/// 10 digits starting with 6-9.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect();
    let cleaned = cleaned.strip_prefix("+91").unwrap_or(&cleaned);
    let cleaned = cleaned.strip_prefix('0').unwrap_or(cleaned);
    if cleaned.len() != 10 || !cleaned.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    if !matches!(cleaned.as_bytes()[0], b'6'..=b'9') {
        return None;
    }
    Some(cleaned.to_string())
}

/// Validates a candidate student against the rest of the population.
///
/// Rules run in a fixed order and stop at the first failure. `others` must
/// not contain the candidate's own persisted row (the caller filters it out
/// on update). `today` is passed in so the dob rules are deterministic.
///
/// Age is current year minus birth year, deliberately not adjusted for
/// month and day; see the dob tests.
pub fn validate_student(
    candidate: &StudentRow,
    others: &[StudentRow],
    today: NaiveDate,
) -> Result<(), EngineError> {
    if candidate.name.trim().is_empty() {
        return Err(EngineError::MissingName);
    }

    let email = candidate.email.trim();
    if email.is_empty() {
        return Err(EngineError::MissingEmail);
    }
    if !is_valid_email(email) {
        return Err(EngineError::InvalidEmailFormat);
    }
    if others.iter().any(|s| s.email.eq_ignore_ascii_case(email)) {
        return Err(EngineError::DuplicateEmail);
    }

    if !candidate.phone.trim().is_empty() {
        if normalize_phone(&candidate.phone).is_none() {
            return Err(EngineError::InvalidPhoneFormat);
        }
        // Uniqueness is on the phone exactly as entered, not the
        // normalized form.
        if others.iter().any(|s| s.phone == candidate.phone) {
            return Err(EngineError::DuplicatePhone);
        }
    }

    if candidate.class_name.is_empty() {
        return Err(EngineError::MissingClass);
    }

    // Roll numbers are stored trimmed, so uniqueness compares the
    // trimmed candidate too.
    let roll_no = candidate.roll_no.trim();
    if roll_no.is_empty() {
        return Err(EngineError::MissingRollNo);
    }
    if others.iter().any(|s| s.roll_no == roll_no) {
        return Err(EngineError::DuplicateRollNo);
    }

    let dob = candidate.dob.trim();
    if dob.is_empty() {
        return Err(EngineError::MissingDob);
    }
    let dob = NaiveDate::parse_from_str(dob, "%Y-%m-%d")
        .map_err(|_| EngineError::InvalidDobFormat)?;
    if dob > today {
        return Err(EngineError::FutureDob);
    }
    if today.year() - dob.year() < 4 {
        return Err(EngineError::TooYoung);
    }

    Ok(())
}

pub fn validate_teacher(candidate: &TeacherRow) -> Result<(), EngineError> {
    if candidate.name.trim().is_empty() {
        return Err(EngineError::MissingName);
    }
    let email = candidate.email.trim();
    if email.is_empty() {
        return Err(EngineError::MissingEmail);
    }
    if !is_valid_email(email) {
        return Err(EngineError::InvalidEmailFormat);
    }
    if candidate.subjects.is_empty() {
        return Err(EngineError::MissingSubjects);
    }
    Ok(())
}

/// Validates a subject candidate. Uniqueness of code and name is checked
/// only against active subjects; a soft-deleted subject does not block.
pub fn validate_subject(
    code: &str,
    name: &str,
    subjects: &[SubjectRow],
) -> Result<(), EngineError> {
    if code.trim().is_empty() {
        return Err(EngineError::MissingCode);
    }
    if name.trim().is_empty() {
        return Err(EngineError::MissingName);
    }
    if subjects.iter().any(|s| s.active && s.code == code) {
        return Err(EngineError::DuplicateCode);
    }
    if subjects.iter().any(|s| s.active && s.subject_name == name) {
        return Err(EngineError::DuplicateName);
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubjectCreatePlan {
    Create,
    /// A soft-deleted subject already carries this code. The operator must
    /// be asked whether to revive it; creating a second record under the
    /// same code is never done silently.
    Reactivate(SubjectRow),
}

pub fn plan_subject_create(
    code: &str,
    name: &str,
    subjects: &[SubjectRow],
) -> Result<SubjectCreatePlan, EngineError> {
    validate_subject(code, name, subjects)?;
    if let Some(prior) = subjects.iter().find(|s| !s.active && s.code == code) {
        return Ok(SubjectCreatePlan::Reactivate(prior.clone()));
    }
    Ok(SubjectCreatePlan::Create)
}

fn has_identity(id: Option<&str>) -> bool {
    id.map(|v| !v.is_empty()).unwrap_or(false)
}

/// Soft delete keeps the row and flips it inactive; there is no hard
/// delete for subjects, so a deleted subject stays revivable.
pub fn check_soft_delete(subject: &SubjectRow) -> Result<(), EngineError> {
    if !has_identity(subject.id.as_deref()) {
        return Err(EngineError::MissingIdentity);
    }
    Ok(())
}

/// Reactivation re-runs the active-only uniqueness check so two subjects
/// independently created around a delete cannot both end up active under
/// one code.
pub fn check_reactivate(
    subject: &SubjectRow,
    snapshot: &[SubjectRow],
) -> Result<(), EngineError> {
    if !has_identity(subject.id.as_deref()) {
        return Err(EngineError::MissingIdentity);
    }
    let others = |s: &&SubjectRow| s.active && s.id != subject.id;
    if snapshot.iter().filter(others).any(|s| s.code == subject.code) {
        return Err(EngineError::DuplicateCode);
    }
    if snapshot
        .iter()
        .filter(others)
        .any(|s| s.subject_name == subject.subject_name)
    {
        return Err(EngineError::DuplicateName);
    }
    Ok(())
}
