mod test_support;

use serde_json::json;
use test_support::{request_ok, spawn_sidecar, temp_dir};

#[test]
fn seal_then_verify_round_trip() {
    let workspace = temp_dir("bulletin-verify");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "school",
        "school.set",
        json!({ "name": "Institut Verify", "yearLabel": "2025-2026" }),
    );
    let class_id = request_ok(
        &mut stdin,
        &mut reader,
        "class",
        "classes.create",
        json!({ "name": "6ème F", "level": "6F" }),
    )["classId"]
        .as_str()
        .expect("classId")
        .to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "cur",
        "curriculum.save",
        json!({
            "sections": [{
                "category": "Général",
                "levels": ["6F"],
                "subjects": [{
                    "name": "Anglais",
                    "maxima": {
                        "period1": 20.0, "period2": 20.0, "exam1": 40.0, "sem1Total": 80.0,
                        "period3": 20.0, "period4": 20.0, "exam2": 40.0, "sem2Total": 80.0,
                        "generalTotal": 160.0
                    }
                }]
            }]
        }),
    );
    let subject_id = request_ok(
        &mut stdin,
        &mut reader,
        "list",
        "curriculum.list",
        json!({ "level": "6F" }),
    )["sections"][0]["subjects"][0]["id"]
        .as_str()
        .expect("subjectId")
        .to_string();
    let student_id = request_ok(
        &mut stdin,
        &mut reader,
        "stu",
        "students.create",
        json!({ "classId": class_id, "lastName": "Tshibangu", "firstName": "Test" }),
    )["studentId"]
        .as_str()
        .expect("studentId")
        .to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "grade",
        "grades.update",
        json!({
            "classId": class_id,
            "studentId": student_id,
            "subjectId": subject_id,
            "patch": { "period1": 14.0, "exam1": 30.0 }
        }),
    );

    let sealed = request_ok(
        &mut stdin,
        &mut reader,
        "seal",
        "bulletins.seal",
        json!({ "classId": class_id, "studentId": student_id }),
    );
    let code = sealed["code"].as_str().expect("seal code").to_string();
    assert_eq!(code.len(), 64, "seal code is a sha-256 hex digest");
    assert_eq!(sealed["yearLabel"], json!("2025-2026"));

    // Fresh seal against unchanged data verifies cleanly.
    let verified = request_ok(
        &mut stdin,
        &mut reader,
        "verify",
        "bulletins.verify",
        json!({ "classId": class_id, "studentId": student_id, "code": code }),
    );
    assert_eq!(verified["valid"], json!(true));
    assert_eq!(verified["stale"], json!(false));

    // A tampered code fails but the stored seal still matches the data.
    let mut forged = code.clone();
    let flipped = if forged.ends_with('0') { "1" } else { "0" };
    forged.replace_range(forged.len() - 1.., flipped);
    let verified = request_ok(
        &mut stdin,
        &mut reader,
        "forged",
        "bulletins.verify",
        json!({ "classId": class_id, "studentId": student_id, "code": forged }),
    );
    assert_eq!(verified["valid"], json!(false));
    assert_eq!(verified["stale"], json!(false));

    // Grades moved after sealing: the printed code no longer matches and the
    // stored seal is flagged stale.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "regrade",
        "grades.update",
        json!({
            "classId": class_id,
            "studentId": student_id,
            "subjectId": subject_id,
            "patch": { "period1": 16.0 }
        }),
    );
    let verified = request_ok(
        &mut stdin,
        &mut reader,
        "verify2",
        "bulletins.verify",
        json!({ "classId": class_id, "studentId": student_id, "code": code }),
    );
    assert_eq!(verified["valid"], json!(false));
    assert_eq!(verified["stale"], json!(true));

    // Re-sealing issues a fresh code for the same year and clears staleness.
    let resealed = request_ok(
        &mut stdin,
        &mut reader,
        "reseal",
        "bulletins.seal",
        json!({ "classId": class_id, "studentId": student_id }),
    );
    let new_code = resealed["code"].as_str().expect("seal code").to_string();
    assert_ne!(new_code, code);
    let verified = request_ok(
        &mut stdin,
        &mut reader,
        "verify3",
        "bulletins.verify",
        json!({ "classId": class_id, "studentId": student_id, "code": new_code }),
    );
    assert_eq!(verified["valid"], json!(true));
    assert_eq!(verified["stale"], json!(false));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
