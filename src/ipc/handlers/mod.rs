pub mod bulletins;
pub mod classes;
pub mod core;
pub mod curriculum;
pub mod devoirs;
pub mod grades;
pub mod settings;
pub mod students;
pub mod timetable;
