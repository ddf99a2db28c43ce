use crate::engine::{self, TeacherRow};
use crate::ipc::error::{err, ok, rule_err};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

/// Subject assignments arrive either as a JSON array or as a legacy
/// comma-joined string. Shape normalization happens here at the boundary;
/// the engine only ever sees a list.
fn subjects_from_value(value: Option<&serde_json::Value>) -> Vec<String> {
    match value {
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        Some(serde_json::Value::String(s)) => split_subjects(s),
        _ => Vec::new(),
    }
}

fn split_subjects(joined: &str) -> Vec<String> {
    joined
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn teacher_json(t: &TeacherRow) -> serde_json::Value {
    json!({
        "teacherId": t.id,
        "name": t.name,
        "email": t.email,
        "phone": t.phone,
        "subjects": t.subjects,
        "experience": t.experience,
        "isActive": t.active
    })
}

fn load_teachers(conn: &Connection) -> Result<Vec<TeacherRow>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT id, name, email, phone, subjects, experience, active
         FROM teachers
         ORDER BY name",
    )?;
    stmt.query_map([], |r| {
        let joined: String = r.get(4)?;
        Ok(TeacherRow {
            id: Some(r.get(0)?),
            name: r.get(1)?,
            email: r.get(2)?,
            phone: r.get(3)?,
            subjects: split_subjects(&joined),
            experience: r.get(5)?,
            active: r.get::<_, i64>(6)? != 0,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
}

fn handle_teachers_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "teachers": [] }));
    };
    match load_teachers(conn) {
        Ok(teachers) => ok(
            &req.id,
            json!({ "teachers": teachers.iter().map(teacher_json).collect::<Vec<_>>() }),
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_teachers_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let get = |key: &str| {
        req.params
            .get(key)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    };
    let candidate = TeacherRow {
        id: None,
        name: get("name"),
        email: get("email"),
        phone: get("phone"),
        subjects: subjects_from_value(req.params.get("subjects")),
        experience: req
            .params
            .get("experience")
            .and_then(|v| v.as_i64())
            .unwrap_or(0),
        active: true,
    };

    if let Err(rule) = engine::validate_teacher(&candidate) {
        return rule_err(&req.id, &rule);
    }

    let teacher_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO teachers(id, name, email, phone, subjects, experience, active)
         VALUES(?, ?, ?, ?, ?, ?, 1)",
        (
            &teacher_id,
            candidate.name.trim(),
            candidate.email.trim(),
            &candidate.phone,
            candidate.subjects.join(","),
            candidate.experience,
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "teachers" })),
        );
    }

    let mut saved = candidate;
    saved.id = Some(teacher_id);
    ok(&req.id, teacher_json(&saved))
}

fn handle_teachers_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let teacher_id = match req.params.get("teacherId").and_then(|v| v.as_str()) {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => return err(&req.id, "bad_params", "missing teacherId", None),
    };
    let patch = req.params.get("patch").cloned().unwrap_or(json!({}));

    let teachers = match load_teachers(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(existing) = teachers
        .iter()
        .find(|t| t.id.as_deref() == Some(teacher_id.as_str()))
        .cloned()
    else {
        return err(&req.id, "not_found", "teacher not found", None);
    };

    let mut updated = existing;
    if let Some(v) = patch.get("name").and_then(|v| v.as_str()) {
        updated.name = v.to_string();
    }
    if let Some(v) = patch.get("email").and_then(|v| v.as_str()) {
        updated.email = v.to_string();
    }
    if let Some(v) = patch.get("phone").and_then(|v| v.as_str()) {
        updated.phone = v.to_string();
    }
    if patch.get("subjects").is_some() {
        updated.subjects = subjects_from_value(patch.get("subjects"));
    }
    if let Some(v) = patch.get("experience").and_then(|v| v.as_i64()) {
        updated.experience = v;
    }

    if let Err(rule) = engine::validate_teacher(&updated) {
        return rule_err(&req.id, &rule);
    }

    if let Err(e) = conn.execute(
        "UPDATE teachers
         SET name = ?, email = ?, phone = ?, subjects = ?, experience = ?
         WHERE id = ?",
        (
            updated.name.trim(),
            updated.email.trim(),
            &updated.phone,
            updated.subjects.join(","),
            updated.experience,
            &teacher_id,
        ),
    ) {
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "teachers" })),
        );
    }

    ok(&req.id, teacher_json(&updated))
}

fn handle_teachers_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let teacher_id = match req.params.get("teacherId").and_then(|v| v.as_str()) {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => return err(&req.id, "bad_params", "missing teacherId", None),
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM teachers WHERE id = ?", [&teacher_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "teacher not found", None);
    }

    if let Err(e) = conn.execute("DELETE FROM teachers WHERE id = ?", [&teacher_id]) {
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "teachers" })),
        );
    }

    ok(&req.id, json!({ "deleted": true, "teacherId": teacher_id }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "teachers.list" => Some(handle_teachers_list(state, req)),
        "teachers.create" => Some(handle_teachers_create(state, req)),
        "teachers.update" => Some(handle_teachers_update(state, req)),
        "teachers.delete" => Some(handle_teachers_delete(state, req)),
        _ => None,
    }
}
