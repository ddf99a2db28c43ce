use crate::engine::{self, StudentRow};
use crate::ipc::error::{err, ok, rule_err};
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

struct HandlerErr {
    code: &'static str,
    message: String,
}

impl HandlerErr {
    fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, None)
    }
}

fn db_err(e: rusqlite::Error) -> HandlerErr {
    HandlerErr {
        code: "db_query_failed",
        message: e.to_string(),
    }
}

/// Loads the freshest student snapshot the local store has. Every
/// validation and roll-number call below works from this, never from
/// anything cached in memory.
fn load_students(conn: &Connection) -> Result<Vec<StudentRow>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, name, email, phone, class_name, roll_no, dob
             FROM students
             ORDER BY roll_no",
        )
        .map_err(db_err)?;
    stmt.query_map([], |r| {
        Ok(StudentRow {
            id: Some(r.get(0)?),
            name: r.get(1)?,
            email: r.get(2)?,
            phone: r.get(3)?,
            class_name: r.get(4)?,
            roll_no: r.get(5)?,
            dob: r.get(6)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(db_err)
}

fn student_json(s: &StudentRow) -> serde_json::Value {
    json!({
        "studentId": s.id,
        "name": s.name,
        "email": s.email,
        "phone": s.phone,
        "className": s.class_name,
        "rollNo": s.roll_no,
        "dob": s.dob
    })
}

fn opt_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

/// Builds the candidate in the exact form the store persists: name,
/// email, roll number and dob trimmed up front, phone kept verbatim
/// (uniqueness matches it as entered).
fn candidate_from_params(params: &serde_json::Value) -> StudentRow {
    let trimmed = |key: &str| {
        opt_str(params, key)
            .unwrap_or_default()
            .trim()
            .to_string()
    };
    StudentRow {
        id: None,
        name: trimmed("name"),
        email: trimmed("email"),
        phone: opt_str(params, "phone").unwrap_or_default(),
        class_name: opt_str(params, "className").unwrap_or_default(),
        roll_no: trimmed("rollNo"),
        dob: trimmed("dob"),
    }
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "students": [] }));
    };

    let students = match load_students(conn) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let class_filter = opt_str(&req.params, "className").filter(|c| c != "all");
    let search = opt_str(&req.params, "search").map(|s| s.to_lowercase());

    let rows: Vec<serde_json::Value> = students
        .iter()
        .filter(|s| {
            class_filter
                .as_ref()
                .map(|c| s.class_name == *c)
                .unwrap_or(true)
        })
        .filter(|s| {
            search
                .as_ref()
                .map(|term| {
                    s.name.to_lowercase().contains(term)
                        || s.email.to_lowercase().contains(term)
                        || s.roll_no.to_lowercase().contains(term)
                })
                .unwrap_or(true)
        })
        .map(student_json)
        .collect();

    ok(&req.id, json!({ "students": rows }))
}

fn handle_next_roll_no(state: &mut AppState, req: &Request) -> serde_json::Value {
    let class_name = match opt_str(&req.params, "className") {
        Some(v) if !v.is_empty() => v,
        _ => return err(&req.id, "bad_params", "missing className", None),
    };

    // Without a workspace there is no snapshot to count from; the operator
    // has to type the roll number by hand.
    let Some(conn) = state.db.as_ref() else {
        return err(
            &req.id,
            "no_data_available",
            "no student snapshot available; enter the roll number manually",
            None,
        );
    };

    let students = match load_students(conn) {
        Ok(v) => v,
        Err(_) => {
            return err(
                &req.id,
                "no_data_available",
                "no student snapshot available; enter the roll number manually",
                None,
            )
        }
    };

    match engine::next_roll_no(&class_name, &students) {
        Ok(roll_no) => ok(
            &req.id,
            json!({ "rollNo": roll_no, "className": class_name }),
        ),
        Err(rule) => rule_err(&req.id, &rule),
    }
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let candidate = candidate_from_params(&req.params);

    // Re-derive the snapshot right before commit; this is the uniqueness
    // backstop for the advisory roll-number generation.
    let snapshot = match load_students(conn) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let today = Utc::now().date_naive();
    if let Err(rule) = engine::validate_student(&candidate, &snapshot, today) {
        return rule_err(&req.id, &rule);
    }

    let student_id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();
    if let Err(e) = conn.execute(
        "INSERT INTO students(id, name, email, phone, class_name, roll_no, dob, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &student_id,
            &candidate.name,
            &candidate.email,
            &candidate.phone,
            &candidate.class_name,
            &candidate.roll_no,
            &candidate.dob,
            &now,
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }

    let mut saved = candidate;
    saved.id = Some(student_id);
    ok(&req.id, student_json(&saved))
}

fn handle_students_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let student_id = match opt_str(&req.params, "studentId") {
        Some(v) if !v.is_empty() => v,
        _ => return err(&req.id, "bad_params", "missing studentId", None),
    };
    let patch = req.params.get("patch").cloned().unwrap_or(json!({}));

    let snapshot = match load_students(conn) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let Some(existing) = snapshot
        .iter()
        .find(|s| s.id.as_deref() == Some(student_id.as_str()))
        .cloned()
    else {
        return err(&req.id, "not_found", "student not found", None);
    };

    // Patched fields get the same trimming as create so the validated,
    // stored and echoed forms stay identical.
    let mut updated = existing;
    if let Some(v) = opt_str(&patch, "name") {
        updated.name = v.trim().to_string();
    }
    if let Some(v) = opt_str(&patch, "email") {
        updated.email = v.trim().to_string();
    }
    if let Some(v) = opt_str(&patch, "phone") {
        updated.phone = v;
    }
    if let Some(v) = opt_str(&patch, "className") {
        updated.class_name = v;
    }
    if let Some(v) = opt_str(&patch, "rollNo") {
        updated.roll_no = v.trim().to_string();
    }
    if let Some(v) = opt_str(&patch, "dob") {
        updated.dob = v.trim().to_string();
    }

    // Uniqueness checks run against everyone except the record itself.
    let others: Vec<StudentRow> = snapshot
        .iter()
        .filter(|s| s.id.as_deref() != Some(student_id.as_str()))
        .cloned()
        .collect();
    let today = Utc::now().date_naive();
    if let Err(rule) = engine::validate_student(&updated, &others, today) {
        return rule_err(&req.id, &rule);
    }

    let now = Utc::now().to_rfc3339();
    if let Err(e) = conn.execute(
        "UPDATE students
         SET name = ?, email = ?, phone = ?, class_name = ?, roll_no = ?, dob = ?, updated_at = ?
         WHERE id = ?",
        (
            &updated.name,
            &updated.email,
            &updated.phone,
            &updated.class_name,
            &updated.roll_no,
            &updated.dob,
            &now,
            &student_id,
        ),
    ) {
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }

    ok(&req.id, student_json(&updated))
}

fn handle_students_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let student_id = match opt_str(&req.params, "studentId") {
        Some(v) if !v.is_empty() => v,
        _ => return err(&req.id, "bad_params", "missing studentId", None),
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [&student_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "student not found", None);
    }

    if let Err(e) = conn.execute("DELETE FROM students WHERE id = ?", [&student_id]) {
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }

    ok(&req.id, json!({ "deleted": true, "studentId": student_id }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(handle_students_list(state, req)),
        "students.nextRollNo" => Some(handle_next_roll_no(state, req)),
        "students.create" => Some(handle_students_create(state, req)),
        "students.update" => Some(handle_students_update(state, req)),
        "students.delete" => Some(handle_students_delete(state, req)),
        _ => None,
    }
}
