use crate::engine::{self, SubjectCreatePlan, SubjectRow};
use crate::ipc::error::{err, ok, rule_err};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

fn subject_json(s: &SubjectRow) -> serde_json::Value {
    json!({
        "subjectId": s.id,
        "code": s.code,
        "subjectName": s.subject_name,
        "isActive": s.active
    })
}

fn load_subjects(conn: &Connection) -> Result<Vec<SubjectRow>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT id, code, subject_name, active
         FROM subjects
         ORDER BY code",
    )?;
    stmt.query_map([], |r| {
        Ok(SubjectRow {
            id: Some(r.get(0)?),
            code: r.get(1)?,
            subject_name: r.get(2)?,
            active: r.get::<_, i64>(3)? != 0,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
}

fn handle_subjects_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "subjects": [] }));
    };

    let include_deleted = req
        .params
        .get("includeDeleted")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    match load_subjects(conn) {
        Ok(subjects) => {
            let active_count = subjects.iter().filter(|s| s.active).count();
            let rows: Vec<serde_json::Value> = subjects
                .iter()
                .filter(|s| include_deleted || s.active)
                .map(subject_json)
                .collect();
            ok(
                &req.id,
                json!({ "subjects": rows, "activeCount": active_count }),
            )
        }
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_subjects_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    // Codes are uppercased at entry; the engine works on the canonical form.
    let code = req
        .params
        .get("code")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .trim()
        .to_uppercase();
    let name = req
        .params
        .get("subjectName")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .trim()
        .to_string();

    let snapshot = match load_subjects(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    match engine::plan_subject_create(&code, &name, &snapshot) {
        Err(rule) => rule_err(&req.id, &rule),
        Ok(SubjectCreatePlan::Reactivate(prior)) => {
            // Don't create a duplicate record; hand the decision back to
            // the operator, who can follow up with subjects.reactivate.
            ok(
                &req.id,
                json!({
                    "created": false,
                    "reactivationCandidate": subject_json(&prior)
                }),
            )
        }
        Ok(SubjectCreatePlan::Create) => {
            let subject_id = Uuid::new_v4().to_string();
            if let Err(e) = conn.execute(
                "INSERT INTO subjects(id, code, subject_name, active) VALUES(?, ?, ?, 1)",
                (&subject_id, &code, &name),
            ) {
                return err(
                    &req.id,
                    "db_insert_failed",
                    e.to_string(),
                    Some(json!({ "table": "subjects" })),
                );
            }
            let saved = SubjectRow {
                id: Some(subject_id),
                code,
                subject_name: name,
                active: true,
            };
            ok(
                &req.id,
                json!({ "created": true, "subject": subject_json(&saved) }),
            )
        }
    }
}

fn find_subject(
    snapshot: &[SubjectRow],
    subject_id: &str,
) -> Option<SubjectRow> {
    snapshot
        .iter()
        .find(|s| s.id.as_deref() == Some(subject_id))
        .cloned()
}

fn handle_subjects_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    // A blank id means the record was never persisted; that is a
    // lifecycle violation, not a lookup miss.
    let subject_id = req
        .params
        .get("subjectId")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    if subject_id.is_empty() {
        return rule_err(&req.id, &engine::EngineError::MissingIdentity);
    }

    let snapshot = match load_subjects(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(subject) = find_subject(&snapshot, &subject_id) else {
        return err(&req.id, "not_found", "subject not found", None);
    };

    if let Err(rule) = engine::check_soft_delete(&subject) {
        return rule_err(&req.id, &rule);
    }

    if let Err(e) = conn.execute(
        "UPDATE subjects SET active = 0 WHERE id = ?",
        [&subject_id],
    ) {
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "subjects" })),
        );
    }

    ok(
        &req.id,
        json!({ "subjectId": subject_id, "isActive": false }),
    )
}

fn handle_subjects_reactivate(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let subject_id = req
        .params
        .get("subjectId")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    if subject_id.is_empty() {
        return rule_err(&req.id, &engine::EngineError::MissingIdentity);
    }

    let snapshot = match load_subjects(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(subject) = find_subject(&snapshot, &subject_id) else {
        return err(&req.id, "not_found", "subject not found", None);
    };

    if let Err(rule) = engine::check_reactivate(&subject, &snapshot) {
        return rule_err(&req.id, &rule);
    }

    if let Err(e) = conn.execute(
        "UPDATE subjects SET active = 1 WHERE id = ?",
        [&subject_id],
    ) {
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "subjects" })),
        );
    }

    let mut revived = subject;
    revived.active = true;
    ok(&req.id, subject_json(&revived))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "subjects.list" => Some(handle_subjects_list(state, req)),
        "subjects.create" => Some(handle_subjects_create(state, req)),
        "subjects.delete" => Some(handle_subjects_delete(state, req)),
        "subjects.reactivate" => Some(handle_subjects_reactivate(state, req)),
        _ => None,
    }
}
