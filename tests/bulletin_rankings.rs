mod test_support;

use serde_json::json;
use std::io::BufReader;
use std::process::{ChildStdin, ChildStdout};
use test_support::{request_ok, spawn_sidecar, temp_dir};

#[test]
fn rankings_are_strict_ordinal_per_column() {
    let workspace = temp_dir("bulletin-rankings");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "class",
        "classes.create",
        json!({ "name": "2ème B", "level": "2B" }),
    );
    let class_id = created["classId"].as_str().expect("classId").to_string();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "cur",
        "curriculum.save",
        json!({
            "sections": [{
                "category": "Général",
                "levels": ["2B"],
                "subjects": [{
                    "name": "Histoire",
                    "maxima": {
                        "period1": 20.0, "period2": 20.0, "exam1": 40.0, "sem1Total": 80.0,
                        "period3": 20.0, "period4": 20.0, "exam2": 40.0, "sem2Total": 80.0,
                        "generalTotal": 160.0
                    }
                }]
            }]
        }),
    );
    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "list",
        "curriculum.list",
        json!({ "level": "2B" }),
    );
    let subject_id = listed["sections"][0]["subjects"][0]["id"]
        .as_str()
        .expect("subjectId")
        .to_string();

    // Roster order is insertion order: Amani, Bahati, Chiza.
    let mut ids = Vec::new();
    for (i, (last, p1)) in [("Amani", 18.0), ("Bahati", 15.0), ("Chiza", 18.0)]
        .iter()
        .enumerate()
    {
        let created = request_ok(
            &mut stdin,
            &mut reader,
            &format!("stu{}", i),
            "students.create",
            json!({ "classId": class_id, "lastName": last, "firstName": "Test" }),
        );
        let student_id = created["studentId"].as_str().expect("studentId").to_string();
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("gr{}", i),
            "grades.update",
            json!({
                "classId": class_id,
                "studentId": student_id,
                "subjectId": subject_id,
                "patch": { "period1": p1, "period3": 20.0 - p1 }
            }),
        );
        ids.push(student_id);
    }

    let model_for = |stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>, sid: &str| {
        request_ok(
            stdin,
            reader,
            "model",
            "bulletins.model",
            json!({ "classId": class_id, "studentId": sid }),
        )
    };

    // Amani and Chiza tie on period1 at 18; insertion order breaks the tie,
    // so Chiza is strictly second. No shared rank.
    let amani = model_for(&mut stdin, &mut reader, &ids[0]);
    assert_eq!(amani["rankings"]["period1"]["rank"], json!(1));
    assert_eq!(amani["rankings"]["period1"]["total"], json!(3));

    let chiza = model_for(&mut stdin, &mut reader, &ids[2]);
    assert_eq!(chiza["rankings"]["period1"]["rank"], json!(2));

    let bahati = model_for(&mut stdin, &mut reader, &ids[1]);
    assert_eq!(bahati["rankings"]["period1"]["rank"], json!(3));

    // Standings differ per column: period3 grades invert the order.
    assert_eq!(bahati["rankings"]["period3"]["rank"], json!(1));
    assert_eq!(amani["rankings"]["period3"]["rank"], json!(2));
    assert_eq!(chiza["rankings"]["period3"]["rank"], json!(3));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn inactive_student_is_unranked() {
    let workspace = temp_dir("bulletin-rankings-inactive");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "class",
        "classes.create",
        json!({ "name": "3ème C", "level": "3C" }),
    );
    let class_id = created["classId"].as_str().expect("classId").to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "cur",
        "curriculum.save",
        json!({
            "sections": [{
                "category": "Général",
                "levels": ["3C"],
                "subjects": [{
                    "name": "Géographie",
                    "maxima": {
                        "period1": 20.0, "period2": 20.0, "exam1": 40.0, "sem1Total": 80.0,
                        "period3": 20.0, "period4": 20.0, "exam2": 40.0, "sem2Total": 80.0,
                        "generalTotal": 160.0
                    }
                }]
            }]
        }),
    );

    let active = request_ok(
        &mut stdin,
        &mut reader,
        "s1",
        "students.create",
        json!({ "classId": class_id, "lastName": "Actif", "firstName": "Un" }),
    )["studentId"]
        .as_str()
        .expect("studentId")
        .to_string();
    let dropped = request_ok(
        &mut stdin,
        &mut reader,
        "s2",
        "students.create",
        json!({ "classId": class_id, "lastName": "Parti", "firstName": "Deux", "active": false }),
    )["studentId"]
        .as_str()
        .expect("studentId")
        .to_string();

    let model = request_ok(
        &mut stdin,
        &mut reader,
        "model",
        "bulletins.model",
        json!({ "classId": class_id, "studentId": dropped }),
    );
    // Inactive students are outside the peer set: rank 0 means "not ranked".
    assert_eq!(model["rankings"]["generalTotal"]["rank"], json!(0));
    assert_eq!(model["rankings"]["generalTotal"]["total"], json!(1));

    let model = request_ok(
        &mut stdin,
        &mut reader,
        "model2",
        "bulletins.model",
        json!({ "classId": class_id, "studentId": active }),
    );
    assert_eq!(model["rankings"]["generalTotal"]["rank"], json!(1));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
