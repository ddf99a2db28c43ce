use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::result::{build_result_sheet, SubjectMark};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn load_marks(conn: &Connection, roll_no: &str) -> Result<Vec<SubjectMark>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT subject, score
         FROM result_marks
         WHERE roll_no = ?
         ORDER BY subject",
    )?;
    stmt.query_map([roll_no], |r| {
        Ok(SubjectMark {
            subject: r.get(0)?,
            score: r.get(1)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
}

fn handle_results_upsert(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_mut() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let roll_no = match req.params.get("rollNo").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing rollNo", None),
    };
    let Some(marks) = req.params.get("marks").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing marks array", None);
    };

    // Validate every entry before the first write; a bad entry must not
    // leave earlier marks committed.
    let mut entries: Vec<(String, f64)> = Vec::with_capacity(marks.len());
    for mark in marks {
        let Some(subject) = mark.get("subject").and_then(|v| v.as_str()) else {
            return err(&req.id, "bad_params", "mark entry missing subject", None);
        };
        let Some(score) = mark.get("score").and_then(|v| v.as_f64()) else {
            return err(&req.id, "bad_params", "mark entry missing score", None);
        };
        if !(0.0..=100.0).contains(&score) {
            return err(
                &req.id,
                "bad_params",
                "score must be between 0 and 100",
                Some(json!({ "subject": subject })),
            );
        }
        entries.push((subject.to_string(), score));
    }

    // All-or-nothing: a write failure rolls the whole batch back.
    let tx = match conn.transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_insert_failed", e.to_string(), None),
    };
    for (subject, score) in &entries {
        let row_id = Uuid::new_v4().to_string();
        if let Err(e) = tx.execute(
            "INSERT INTO result_marks(id, roll_no, subject, score)
             VALUES(?, ?, ?, ?)
             ON CONFLICT(roll_no, subject) DO UPDATE SET score = excluded.score",
            (&row_id, &roll_no, subject, *score),
        ) {
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "result_marks" })),
            );
        }
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({ "rollNo": roll_no, "written": entries.len() as i64 }),
    )
}

fn handle_results_lookup(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let roll_no = match req.params.get("rollNo").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing rollNo", None),
    };
    let dob = match req.params.get("dob").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing dob", None),
    };

    // Roll number plus dob together act as the lookup credential.
    let student: Option<(String, String)> = match conn
        .query_row(
            "SELECT name, class_name FROM students WHERE roll_no = ? AND dob = ?",
            (&roll_no, &dob),
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((name, class_name)) = student else {
        return err(
            &req.id,
            "not_found",
            "no result on file for that roll number and date of birth",
            None,
        );
    };

    let marks = match load_marks(conn, &roll_no) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let sheet = build_result_sheet(&marks);
    let sheet_json = match serde_json::to_value(&sheet) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "serialize_failed", e.to_string(), None),
    };

    ok(
        &req.id,
        json!({
            "name": name,
            "rollNo": roll_no,
            "dob": dob,
            "className": class_name,
            "sheet": sheet_json,
            "verification": format!("ROLL:{},DOB:{},RESULT:VERIFIED", roll_no, dob)
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "results.upsert" => Some(handle_results_upsert(state, req)),
        "results.lookup" => Some(handle_results_lookup(state, req)),
        _ => None,
    }
}
