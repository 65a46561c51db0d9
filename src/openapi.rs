// src/openapi.rs

use utoipa::OpenApi;

use crate::{
    handlers::{
        analytics::{CourseStat, StudentStats},
        catalog::{CourseDetail, EnrollResponse},
        landing::{ChatRequest, ChatResponse, LandingStats},
        lessons::{CompletionResponse, LessonView},
        student::CourseAttendanceDetail,
        teacher::{
            analytics::{CourseAnalytics, LessonCompletion, StudentProgress, TopStudent},
            attendance::AttendanceSheet,
            courses::TeacherCourseDetail,
            quizzes::TeacherQuizDetail,
        },
    },
    models::{
        activity::{ActivityCount, ActivityLog, ActivityType},
        attendance::{
            Attendance, AttendanceReport, AttendanceReportRow, AttendanceSheetRow,
            AttendanceStatus, CourseAttendanceSummary, Session, SessionAttendance, SessionType,
        },
        course::{
            Course, CourseSummary, Enrollment, EnrollmentStatus, Lesson, LessonOutline,
            LessonProgress, Module, ModuleOutline, MyCourse,
        },
        grade::{Grade, GradebookEntry, LetterGrade, RosterEntry},
        quiz::{
            Answer, AttemptResult, AttemptRow, AttemptView, PublicAnswer, PublicQuestion,
            Question, QuestionType, QuestionWithAnswers, Quiz, QuizAttempt, QuizDetail,
            QuizListItem, QuizStats, QuizStatus, ReviewedQuestion, StartAttemptResponse,
            StudentAnswer, SubmitAnswersRequest,
        },
        user::{CreateUserRequest, LoginRequest, Role, StudentRef, UpdateProfileRequest, UserResponse},
    },
};

/// Schema document served at `/api-docs/openapi.json`.
#[derive(OpenApi)]
#[openapi(
    info(title = "LMS API", description = "Courses, quizzes, attendance and grades"),
    components(schemas(
        Role, UserResponse, StudentRef, CreateUserRequest, LoginRequest, UpdateProfileRequest,
        Course, CourseSummary, CourseDetail, EnrollResponse, Module, Lesson, LessonOutline,
        ModuleOutline, Enrollment, EnrollmentStatus, LessonProgress, MyCourse, LessonView,
        CompletionResponse, TeacherCourseDetail,
        Quiz, QuizStatus, Question, QuestionType, Answer, QuizAttempt, StudentAnswer,
        PublicAnswer, PublicQuestion, QuestionWithAnswers, QuizListItem, QuizDetail,
        AttemptView, ReviewedQuestion, AttemptResult, StartAttemptResponse,
        SubmitAnswersRequest, QuizStats, AttemptRow, TeacherQuizDetail,
        Session, SessionType, Attendance, AttendanceStatus, CourseAttendanceSummary,
        SessionAttendance, AttendanceSheetRow, AttendanceReportRow, AttendanceReport,
        AttendanceSheet, CourseAttendanceDetail,
        Grade, LetterGrade, GradebookEntry, RosterEntry,
        ActivityLog, ActivityType, ActivityCount,
        CourseAnalytics, TopStudent, LessonCompletion, StudentProgress, CourseStat, StudentStats,
        LandingStats, ChatRequest, ChatResponse,
    )),
    tags(
        (name = "auth", description = "Registration, login and profile"),
        (name = "catalog", description = "Courses, lessons and enrollment"),
        (name = "quiz", description = "Quiz attempts and results"),
        (name = "teacher", description = "Course authoring, attendance and grading"),
        (name = "admin", description = "Users, organization and maintenance"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_core_schemas() {
        let doc = ApiDoc::openapi();
        let schemas = doc.components.expect("components").schemas;
        for name in ["Quiz", "AttemptResult", "Grade", "AttendanceReport", "Role"] {
            assert!(schemas.contains_key(name), "missing schema {name}");
        }
    }
}
