mod test_support;

use serde_json::json;
use test_support::{error_code, request, request_ok, spawn_sidecar, temp_dir};

#[test]
fn grade_entry_is_bounded_by_subject_maxima() {
    let workspace = temp_dir("grades-validation");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let class_id = request_ok(
        &mut stdin,
        &mut reader,
        "class",
        "classes.create",
        json!({ "name": "4ème D", "level": "4D" }),
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
                "category": "Sciences",
                "levels": ["4D"],
                "subjects": [{
                    "name": "Physique",
                    "maxima": {
                        "period1": 10.0, "period2": 10.0, "exam1": 20.0, "sem1Total": 40.0,
                        "period3": 10.0, "period4": 10.0, "exam2": 20.0, "sem2Total": 40.0,
                        "generalTotal": 80.0
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
        json!({ "level": "4D" }),
    )["sections"][0]["subjects"][0]["id"]
        .as_str()
        .expect("subjectId")
        .to_string();
    let student_id = request_ok(
        &mut stdin,
        &mut reader,
        "stu",
        "students.create",
        json!({ "classId": class_id, "lastName": "Kasongo", "firstName": "Test" }),
    )["studentId"]
        .as_str()
        .expect("studentId")
        .to_string();

    // Over the slot max.
    let resp = request(
        &mut stdin,
        &mut reader,
        "over",
        "grades.update",
        json!({
            "classId": class_id,
            "studentId": student_id,
            "subjectId": subject_id,
            "patch": { "period1": 10.5 }
        }),
    );
    assert_eq!(error_code(&resp), "bad_params");

    // Negative.
    let resp = request(
        &mut stdin,
        &mut reader,
        "neg",
        "grades.update",
        json!({
            "classId": class_id,
            "studentId": student_id,
            "subjectId": subject_id,
            "patch": { "exam1": -1.0 }
        }),
    );
    assert_eq!(error_code(&resp), "bad_params");

    // Boundary values pass; zero is a real score, distinct from unset.
    let ok_resp = request_ok(
        &mut stdin,
        &mut reader,
        "edge",
        "grades.update",
        json!({
            "classId": class_id,
            "studentId": student_id,
            "subjectId": subject_id,
            "patch": { "period1": 10.0, "period2": 0.0 }
        }),
    );
    assert_eq!(ok_resp["scores"]["period1"], json!(10.0));
    assert_eq!(ok_resp["scores"]["period2"], json!(0.0));
    assert_eq!(ok_resp["sem1Total"], json!(10.0));

    // null clears a slot back to unset without touching the others.
    let cleared = request_ok(
        &mut stdin,
        &mut reader,
        "clear",
        "grades.update",
        json!({
            "classId": class_id,
            "studentId": student_id,
            "subjectId": subject_id,
            "patch": { "period1": null }
        }),
    );
    assert!(cleared["scores"]["period1"].is_null());
    assert_eq!(cleared["scores"]["period2"], json!(0.0));
    assert_eq!(cleared["sem1Total"], json!(0.0));

    // Unknown subject.
    let resp = request(
        &mut stdin,
        &mut reader,
        "missing",
        "grades.update",
        json!({
            "classId": class_id,
            "studentId": student_id,
            "subjectId": "no-such-subject",
            "patch": { "period1": 1.0 }
        }),
    );
    assert_eq!(error_code(&resp), "not_found");

    // Empty patch.
    let resp = request(
        &mut stdin,
        &mut reader,
        "empty",
        "grades.update",
        json!({
            "classId": class_id,
            "studentId": student_id,
            "subjectId": subject_id,
            "patch": {}
        }),
    );
    assert_eq!(error_code(&resp), "bad_params");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
